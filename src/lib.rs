//! # Smart Traffic Controller Library
//!
//! Controller for a two-road intersection. Each road carries two presence
//! sensors a fixed distance apart; the controller alternates right-of-way
//! between the roads, times vehicles between the sensors to derive their
//! speed, and reports per-interval statistics to a run log.
//!
//! ## Crate Structure
//!
//! - **`statistics`**: Pure statistics over a slice of speeds: mean, standard
//!   deviations, extrema with their 1-based positions, and all modes.
//! - **`controller`**: The phase state machine. Owns the per-road interval
//!   history and drives signal lines, sensor polling and early switching.
//! - **`hardware`**: The `DigitalIo` seam with a sysfs GPIO backend, a
//!   traffic simulator and a scriptable mock.
//! - **`clock`**: Monotonic time sources. Delays are busy-waits.
//! - **`report`**: The `ReportSink` trait and the plain-text run log.
//! - **`config`**: Layered settings loaded with `figment`.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: The crate-level `TrafficError`.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod report;
pub mod statistics;

pub use clock::{Clock, MonotonicClock};
pub use config::Settings;
pub use controller::{ControllerConfig, PhaseController, RunSummary};
pub use error::{AppResult, TrafficError};
pub use hardware::{DigitalIo, RoadId};
pub use report::{ReportSink, TextReport};
pub use statistics::{compute_statistics, Statistics};
