//! Custom error types for the application.
//!
//! `TrafficError` is the crate-level error. The run itself never fails on a
//! hardware fault, an empty interval or a short sample set; those are logged
//! and absorbed by the controller. What remains here is what can stop the
//! process before a run starts:
//!
//! - **`Config`**: the configuration file or environment could not be parsed.
//! - **`Configuration`**: values parsed but are logically invalid.
//! - **`Logging`**: the tracing subscriber could not be installed.
//! - **`Report`**: the run log could not be opened.

use thiserror::Error;

use crate::report::ReportError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, TrafficError>;

/// Errors that stop the controller from starting.
#[derive(Error, Debug)]
pub enum TrafficError {
    /// Settings could not be extracted from defaults, file and environment
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings are well-formed but unusable
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A global subscriber could not be installed
    #[error("Failed to initialize tracing: {0}")]
    Logging(String),

    /// The report sink could not be set up
    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}
