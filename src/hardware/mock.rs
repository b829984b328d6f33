//! Mock Digital I/O
//!
//! Scriptable stand-in for the intersection hardware. Sensor lines are
//! asserted during time windows measured on the [`SteppingClock`] the
//! controller polls with. The mock looks at the clock's last reading, so a
//! sensor sample lines up with the timestamp the controller took for the same
//! poll iteration.
//!
//! # Example
//!
//! ```
//! use smart_traffic::clock::{Clock, SteppingClock};
//! use smart_traffic::hardware::mock::MockGpio;
//! use smart_traffic::hardware::{Direction, DigitalIo, LineId};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(SteppingClock::new(Duration::from_millis(1)));
//! let mut gpio = MockGpio::new(Arc::clone(&clock))
//!     .assert_between(LineId(11), Duration::from_millis(5), Duration::from_millis(8));
//!
//! gpio.request_line(LineId(11)).unwrap();
//! gpio.set_direction(LineId(11), Direction::Input).unwrap();
//!
//! clock.advance(Duration::from_millis(6));
//! clock.now();
//! assert!(gpio.read_line(LineId(11)).unwrap());
//! ```

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SteppingClock;
use crate::hardware::{DigitalIo, Direction, HardwareError, HwResult, LineId};

/// One recorded output write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// Line written
    pub line: LineId,
    /// Level driven
    pub value: bool,
    /// Clock reading at the time of the write
    pub at: Duration,
}

#[derive(Debug, Clone)]
struct Window {
    line: LineId,
    span: Range<Duration>,
}

impl Window {
    fn covers(&self, line: LineId, at: Duration) -> bool {
        self.line == line && self.span.contains(&at)
    }
}

/// Mock GPIO driven by a shared clock.
#[derive(Debug)]
pub struct MockGpio {
    clock: Arc<SteppingClock>,
    requested: HashSet<LineId>,
    directions: HashMap<LineId, Direction>,
    levels: HashMap<LineId, bool>,
    asserted: Vec<Window>,
    read_faults: Vec<Window>,
    write_faults: HashSet<LineId>,
    writes: Vec<WriteRecord>,
    reads: usize,
}

impl MockGpio {
    /// Mock with every line low and nothing requested.
    pub fn new(clock: Arc<SteppingClock>) -> Self {
        Self {
            clock,
            requested: HashSet::new(),
            directions: HashMap::new(),
            levels: HashMap::new(),
            asserted: Vec::new(),
            read_faults: Vec::new(),
            write_faults: HashSet::new(),
            writes: Vec::new(),
            reads: 0,
        }
    }

    /// Hold `line` high for `from..until`.
    pub fn assert_between(mut self, line: LineId, from: Duration, until: Duration) -> Self {
        self.asserted.push(Window {
            line,
            span: from..until,
        });
        self
    }

    /// Hold `line` high for `width` starting at `at`.
    pub fn pulse(self, line: LineId, at: Duration, width: Duration) -> Self {
        self.assert_between(line, at, at + width)
    }

    /// Make every read of `line` during `from..until` fail.
    pub fn fail_reads_between(mut self, line: LineId, from: Duration, until: Duration) -> Self {
        self.read_faults.push(Window {
            line,
            span: from..until,
        });
        self
    }

    /// Make every write to `line` fail.
    pub fn fail_writes_to(mut self, line: LineId) -> Self {
        self.write_faults.insert(line);
        self
    }

    /// Every successful output write, in order.
    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    /// Last level driven onto an output line.
    pub fn level(&self, line: LineId) -> Option<bool> {
        self.levels.get(&line).copied()
    }

    /// Direction last set on `line`.
    pub fn direction(&self, line: LineId) -> Option<Direction> {
        self.directions.get(&line).copied()
    }

    /// Whether `line` has been requested.
    pub fn is_requested(&self, line: LineId) -> bool {
        self.requested.contains(&line)
    }

    /// Number of read attempts, failed ones included.
    pub fn read_count(&self) -> usize {
        self.reads
    }

    fn check(&self, line: LineId, expected: Direction) -> HwResult<()> {
        if !self.requested.contains(&line) {
            return Err(HardwareError::LineNotRequested { line });
        }
        match self.directions.get(&line) {
            Some(&actual) if actual != expected => Err(HardwareError::WrongDirection {
                line,
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

impl DigitalIo for MockGpio {
    fn request_line(&mut self, line: LineId) -> HwResult<()> {
        self.requested.insert(line);
        Ok(())
    }

    fn set_direction(&mut self, line: LineId, direction: Direction) -> HwResult<()> {
        if !self.requested.contains(&line) {
            return Err(HardwareError::LineNotRequested { line });
        }
        self.directions.insert(line, direction);
        Ok(())
    }

    fn read_line(&mut self, line: LineId) -> HwResult<bool> {
        self.reads += 1;
        self.check(line, Direction::Input)?;

        let at = self.clock.last_reading();
        if self.read_faults.iter().any(|w| w.covers(line, at)) {
            return Err(HardwareError::Fault {
                line,
                message: "injected read fault".into(),
            });
        }
        Ok(self.asserted.iter().any(|w| w.covers(line, at)))
    }

    fn write_line(&mut self, line: LineId, value: bool) -> HwResult<()> {
        self.check(line, Direction::Output)?;
        if self.write_faults.contains(&line) {
            return Err(HardwareError::Fault {
                line,
                message: "injected write fault".into(),
            });
        }
        let at = self.clock.last_reading();
        self.levels.insert(line, value);
        self.writes.push(WriteRecord { line, value, at });
        Ok(())
    }
}
