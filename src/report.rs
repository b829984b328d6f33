//! Run reports.
//!
//! The controller hands every completed, non-empty interval to a
//! [`ReportSink`]. [`TextReport`] renders those hand-offs as plain text blocks
//! appended to the run log, optionally echoing them to stdout.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::config::ReportSettings;
use crate::controller::Interval;
use crate::error::AppResult;
use crate::hardware::RoadId;
use crate::statistics::Statistics;

/// Errors produced by report sinks.
#[derive(Error, Debug)]
pub enum ReportError {
    /// The log file could not be opened or written
    #[error("Report I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Everything a sink needs to describe one finished interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalReport<'a> {
    /// Road the interval belongs to
    pub road: RoadId,
    /// The closed interval and its samples
    pub interval: &'a Interval,
    /// Statistics over the interval's speeds
    pub statistics: &'a Statistics,
    /// Statistics over the road's per-interval means so far
    pub overall: &'a Statistics,
    /// Interval number with the lowest mean speed so far
    pub slowest_interval: usize,
    /// Interval number with the highest mean speed so far
    pub fastest_interval: usize,
}

/// Consumer of run output.
pub trait ReportSink {
    /// Called once before the first phase.
    fn begin_run(&mut self, started: DateTime<Local>) -> Result<(), ReportError>;

    /// Called after each interval that observed at least one vehicle.
    fn interval_completed(&mut self, report: &IntervalReport<'_>) -> Result<(), ReportError>;
}

impl<T: ReportSink + ?Sized> ReportSink for Box<T> {
    fn begin_run(&mut self, started: DateTime<Local>) -> Result<(), ReportError> {
        (**self).begin_run(started)
    }

    fn interval_completed(&mut self, report: &IntervalReport<'_>) -> Result<(), ReportError> {
        (**self).interval_completed(report)
    }
}

/// Plain-text report written to any [`Write`] target.
#[derive(Debug)]
pub struct TextReport<W: Write> {
    writer: W,
    echo: bool,
}

impl TextReport<File> {
    /// Open `path` for appending, creating it if needed.
    pub fn append_to(path: impl AsRef<Path>, echo: bool) -> Result<Self, ReportError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::new(file, echo))
    }

    /// Open the configured run log.
    pub fn from_settings(settings: &ReportSettings) -> AppResult<Self> {
        Ok(Self::append_to(&settings.log_path, settings.echo)?)
    }
}

impl<W: Write> TextReport<W> {
    /// Report into `writer`, echoing to stdout when `echo` is set.
    pub fn new(writer: W, echo: bool) -> Self {
        Self { writer, echo }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit(&mut self, text: &str) -> Result<(), ReportError> {
        if self.echo {
            print!("{text}");
        }
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> ReportSink for TextReport<W> {
    fn begin_run(&mut self, started: DateTime<Local>) -> Result<(), ReportError> {
        self.emit(&format_run_header(started))
    }

    fn interval_completed(&mut self, report: &IntervalReport<'_>) -> Result<(), ReportError> {
        self.emit(&format_interval(report))
    }
}

/// `RUNNING @ <ctime-style timestamp>` line opening a run's log section.
pub fn format_run_header(started: DateTime<Local>) -> String {
    format!("RUNNING @ {}\n", started.format("%a %b %e %H:%M:%S %Y"))
}

/// Render one interval block.
pub fn format_interval(report: &IntervalReport<'_>) -> String {
    let stats = report.statistics;
    let overall = report.overall;
    let mut out = String::new();

    out.push_str(&format!(
        "------- {}: Interval {} -------\n",
        report.road,
        report.interval.index()
    ));
    out.push_str(&format!(
        "Vehicles through intersection: {}\n",
        report.interval.vehicle_count()
    ));
    out.push_str(&format!("Minimum Detected Speed: {:.6}\n", stats.min));
    out.push_str(&format!("Maximum Detected Speed: {:.6}\n", stats.max));
    out.push_str(&format!("Average Detected Speed: {:.6}\n", stats.mean));
    out.push_str(&format!(
        "Sample Standard Deviation: {:.6}\n",
        stats.sample_std_dev
    ));
    out.push_str(&format!(
        "Population Standard Deviation: {:.6}\n",
        stats.population_std_dev
    ));

    let modes = stats
        .modes
        .values()
        .iter()
        .map(|m| format!("{m:.6}"))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!(
        "Mode(s): {modes} ({} value{})\n",
        stats.modes.len(),
        if stats.modes.len() == 1 { "" } else { "s" }
    ));

    out.push_str("------------------------------------------------------\n");
    out.push_str(&format!("Overall Average Speed: {:.6}\n", overall.mean));
    out.push_str(&format!(
        "Average Speed is SLOWEST during Interval {} ({:.6})\n",
        report.slowest_interval, overall.min
    ));
    out.push_str(&format!(
        "Average Speed is FASTEST during Interval {} ({:.6})\n",
        report.fastest_interval, overall.max
    ));
    if overall.population_std_dev != 0.0 {
        out.push_str(&format!(
            "Overall Sample Standard Deviation: {:.6}\n",
            overall.sample_std_dev
        ));
        out.push_str(&format!(
            "Overall Population Standard Deviation: {:.6}\n",
            overall.population_std_dev
        ));
    }
    out.push('\n');
    out
}
