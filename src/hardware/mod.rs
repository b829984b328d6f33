//! Digital I/O Hardware Layer
//!
//! The controller talks to the intersection through the [`DigitalIo`]
//! capability: four input lines (entry and exit sensor per road) and three
//! output lines (a stop signal per road plus one shared go signal).
//!
//! # Backends
//!
//! - [`sysfs::SysfsGpio`] - Linux `/sys/class/gpio` lines on the target board
//! - [`simulated::SimulatedIntersection`] - random traffic, no hardware needed
//! - [`mock::MockGpio`] - scripted sensor windows and fault injection for tests
//!
//! Every call returns a [`HwResult`]. The controller treats a failure as a
//! skipped poll iteration, never as the end of a run.

pub mod mock;
pub mod simulated;
pub mod sysfs;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PinSettings;

/// Result type alias for digital I/O operations.
pub type HwResult<T> = std::result::Result<T, HardwareError>;

/// A GPIO line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub u32);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpio{}", self.0)
    }
}

/// Direction for a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Configure line as input
    #[default]
    Input,
    /// Configure line as output
    Output,
}

impl Direction {
    /// Keyword used by the sysfs `direction` attribute.
    pub fn as_sysfs(self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }
}

/// Errors that can occur when accessing digital lines.
#[derive(Error, Debug)]
pub enum HardwareError {
    /// Line was used before being requested
    #[error("Line {line} has not been requested")]
    LineNotRequested {
        /// Offending line
        line: LineId,
    },

    /// Read from an output or write to an input
    #[error("Line {line} is configured as {actual:?}, expected {expected:?}")]
    WrongDirection {
        /// Offending line
        line: LineId,
        /// Direction the operation needs
        expected: Direction,
        /// Direction the line has
        actual: Direction,
    },

    /// I/O error from the operating system
    #[error("I/O error on {line}: {source}")]
    Io {
        /// Line being accessed
        line: LineId,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Device reported something unexpected
    #[error("Hardware fault on {line}: {message}")]
    Fault {
        /// Line being accessed
        line: LineId,
        /// What went wrong
        message: String,
    },
}

/// Capability: discrete signal lines.
///
/// # Contract
/// - A line must be requested before it is configured, read or written
/// - `read_line` returns `true` when the line is asserted (high)
/// - Implementations are driven from a single control loop and need not be
///   thread-safe
pub trait DigitalIo {
    /// Claim a line for exclusive use.
    fn request_line(&mut self, line: LineId) -> HwResult<()>;

    /// Configure a requested line as input or output.
    fn set_direction(&mut self, line: LineId, direction: Direction) -> HwResult<()>;

    /// Sample an input line.
    fn read_line(&mut self, line: LineId) -> HwResult<bool>;

    /// Drive an output line.
    fn write_line(&mut self, line: LineId, value: bool) -> HwResult<()>;
}

impl<T: DigitalIo + ?Sized> DigitalIo for Box<T> {
    fn request_line(&mut self, line: LineId) -> HwResult<()> {
        (**self).request_line(line)
    }

    fn set_direction(&mut self, line: LineId, direction: Direction) -> HwResult<()> {
        (**self).set_direction(line, direction)
    }

    fn read_line(&mut self, line: LineId) -> HwResult<bool> {
        (**self).read_line(line)
    }

    fn write_line(&mut self, line: LineId, value: bool) -> HwResult<()> {
        (**self).write_line(line, value)
    }
}

/// The two roads meeting at the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoadId {
    /// First road; has right-of-way in the first phase
    A,
    /// Cross road
    B,
}

impl RoadId {
    /// The road across the intersection.
    pub fn other(self) -> Self {
        match self {
            RoadId::A => RoadId::B,
            RoadId::B => RoadId::A,
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            RoadId::A => 0,
            RoadId::B => 1,
        }
    }
}

impl fmt::Display for RoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoadId::A => f.write_str("Road A"),
            RoadId::B => f.write_str("Road B"),
        }
    }
}

/// Lines belonging to one road.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoadLines {
    /// First trip sensor; also the cross-traffic demand sensor for the other road
    pub entry: LineId,
    /// Second trip sensor, `distance_m` downstream of `entry`
    pub exit: LineId,
    /// Stop signal for this road
    pub stop: LineId,
}

/// Full line map of the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntersectionLines {
    /// Lines of road A
    pub road_a: RoadLines,
    /// Lines of road B
    pub road_b: RoadLines,
    /// Shared go signal
    pub go: LineId,
}

impl IntersectionLines {
    /// Lines of one road.
    pub fn road(&self, road: RoadId) -> RoadLines {
        match road {
            RoadId::A => self.road_a,
            RoadId::B => self.road_b,
        }
    }

    /// All sensor lines, configured as inputs.
    pub fn inputs(&self) -> [LineId; 4] {
        [
            self.road_a.entry,
            self.road_a.exit,
            self.road_b.entry,
            self.road_b.exit,
        ]
    }

    /// All signal lines, configured as outputs.
    pub fn outputs(&self) -> [LineId; 3] {
        [self.road_a.stop, self.road_b.stop, self.go]
    }
}

impl From<&PinSettings> for IntersectionLines {
    fn from(pins: &PinSettings) -> Self {
        Self {
            road_a: RoadLines {
                entry: LineId(pins.road_a_entry),
                exit: LineId(pins.road_a_exit),
                stop: LineId(pins.road_a_stop),
            },
            road_b: RoadLines {
                entry: LineId(pins.road_b_entry),
                exit: LineId(pins.road_b_exit),
                stop: LineId(pins.road_b_stop),
            },
            go: LineId(pins.go),
        }
    }
}
