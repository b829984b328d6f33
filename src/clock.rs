//! Monotonic clock sources for the polling loop.
//!
//! The controller never sleeps: delays spin against [`Clock::now`] until the
//! target time is reached, and phase budgets are checked once per poll
//! iteration. Swapping the clock is how tests drive the controller through
//! whole phases without waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time source.
pub trait Clock {
    /// Time elapsed since the clock's origin. Never decreases.
    fn now(&self) -> Duration;

    /// Busy-wait until `duration` has passed.
    ///
    /// No yielding and no cancellation.
    fn delay(&self, duration: Duration) {
        let target = self.now() + duration;
        while self.now() < target {
            std::hint::spin_loop();
        }
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Wall-clock independent clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Simulated clock that advances by a fixed step on every reading.
///
/// Each call to [`Clock::now`] returns the current time and then moves it
/// forward, so a loop that reads the clock once per iteration sees evenly
/// spaced timestamps and always terminates.
///
/// # Example
///
/// ```
/// use smart_traffic::clock::{Clock, SteppingClock};
/// use std::time::Duration;
///
/// let clock = SteppingClock::new(Duration::from_millis(1));
/// assert_eq!(clock.now(), Duration::ZERO);
/// assert_eq!(clock.now(), Duration::from_millis(1));
/// ```
#[derive(Debug)]
pub struct SteppingClock {
    nanos: AtomicU64,
    last: AtomicU64,
    step_nanos: u64,
}

impl SteppingClock {
    /// Clock at zero that advances by `step` per reading.
    pub fn new(step: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(0),
            last: AtomicU64::new(0),
            step_nanos: duration_nanos(step),
        }
    }

    /// Time the next [`Clock::now`] call will return, without advancing.
    pub fn peek(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    /// Value returned by the most recent [`Clock::now`] call.
    pub fn last_reading(&self) -> Duration {
        Duration::from_nanos(self.last.load(Ordering::SeqCst))
    }

    /// Jump forward by `duration` without a reading.
    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration_nanos(duration), Ordering::SeqCst);
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Duration {
        let reading = self.nanos.fetch_add(self.step_nanos, Ordering::SeqCst);
        self.last.store(reading, Ordering::SeqCst);
        Duration::from_nanos(reading)
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
