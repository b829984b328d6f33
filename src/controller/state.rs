//! Run state owned by the phase controller.

use std::time::Duration;

use serde::Serialize;

use crate::hardware::RoadId;
use crate::report::IntervalReport;
use crate::statistics::{compute_statistics, Statistics, StatisticsError};

/// Speed samples collected on one road during one phase.
///
/// Samples keep detection order. Statistics are attached when the phase
/// closes and only if at least one vehicle was recorded; after that the
/// interval is read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interval {
    road: RoadId,
    index: usize,
    speeds: Vec<f64>,
    statistics: Option<Statistics>,
}

impl Interval {
    pub(crate) fn new(road: RoadId, index: usize) -> Self {
        Self {
            road,
            index,
            speeds: Vec::new(),
            statistics: None,
        }
    }

    /// Road the samples were taken on.
    pub fn road(&self) -> RoadId {
        self.road
    }

    /// 1-based interval number for this road.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Speeds in m/s, in detection order.
    pub fn speeds(&self) -> &[f64] {
        &self.speeds
    }

    /// Number of recorded speeds.
    pub fn vehicle_count(&self) -> usize {
        self.speeds.len()
    }

    /// Statistics, once the interval closed with vehicles.
    pub fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    pub(crate) fn record(&mut self, speed: f64) {
        self.speeds.push(speed);
    }
}

/// Everything recorded for one road over the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Road {
    id: RoadId,
    active: bool,
    intervals: Vec<Interval>,
    interval_means: Vec<f64>,
    overall: Option<Statistics>,
}

impl Road {
    fn new(id: RoadId, active: bool) -> Self {
        Self {
            id,
            active,
            intervals: Vec::new(),
            interval_means: Vec::new(),
            overall: None,
        }
    }

    /// Which road this is.
    pub fn id(&self) -> RoadId {
        self.id
    }

    /// Whether this road currently has right-of-way.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Closed intervals, empty ones included.
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Mean speed of every non-empty interval, in order.
    pub fn interval_means(&self) -> &[f64] {
        &self.interval_means
    }

    /// Statistics over [`Road::interval_means`].
    pub fn overall(&self) -> Option<&Statistics> {
        self.overall.as_ref()
    }

    /// Number of the next interval to open.
    pub fn next_index(&self) -> usize {
        self.intervals.len() + 1
    }

    /// Interval number behind the `position`-th (1-based) entry of
    /// [`Road::interval_means`]. Empty intervals have no mean, so the two
    /// numberings drift apart once one occurs.
    pub fn interval_for_mean(&self, position: usize) -> Option<usize> {
        self.intervals
            .iter()
            .filter(|interval| interval.statistics.is_some())
            .nth(position.checked_sub(1)?)
            .map(Interval::index)
    }

    /// Store an interval without statistics.
    pub(crate) fn close_empty(&mut self, interval: Interval) {
        self.intervals.push(interval);
    }

    /// Compute the interval's statistics, then refresh the overall record.
    pub(crate) fn close_interval(&mut self, mut interval: Interval) -> Result<(), StatisticsError> {
        let statistics = compute_statistics(&interval.speeds)?;
        self.interval_means.push(statistics.mean);
        interval.statistics = Some(statistics);
        self.intervals.push(interval);
        self.overall = Some(compute_statistics(&self.interval_means)?);
        Ok(())
    }

    /// Report for the most recently closed interval, if it has statistics.
    pub fn latest_report(&self) -> Option<IntervalReport<'_>> {
        let interval = self.intervals.last()?;
        let statistics = interval.statistics.as_ref()?;
        let overall = self.overall.as_ref()?;
        Some(IntervalReport {
            road: self.id,
            interval,
            statistics,
            overall,
            slowest_interval: self.interval_for_mean(overall.min_index)?,
            fastest_interval: self.interval_for_mean(overall.max_index)?,
        })
    }
}

/// The controller's complete mutable state.
///
/// Exactly one road is active. `transit_start` doubles as the in-transit
/// flag: it holds the entry timestamp while a vehicle is between sensors.
/// The last sampled sensor levels are kept so only rising edges count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerState {
    roads: [Road; 2],
    phases_completed: usize,
    transit_start: Option<Duration>,
    switching: bool,
    entry_level: bool,
    exit_level: bool,
}

/// Sensor lines that went from low to high since the previous sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SensorEdges {
    pub(crate) entry: bool,
    pub(crate) exit: bool,
}

impl ControllerState {
    /// Fresh state with road A active.
    pub fn new() -> Self {
        Self {
            roads: [Road::new(RoadId::A, true), Road::new(RoadId::B, false)],
            phases_completed: 0,
            transit_start: None,
            switching: false,
            entry_level: false,
            exit_level: false,
        }
    }

    /// History of one road.
    pub fn road(&self, id: RoadId) -> &Road {
        &self.roads[id.slot()]
    }

    pub(crate) fn road_mut(&mut self, id: RoadId) -> &mut Road {
        &mut self.roads[id.slot()]
    }

    /// The road that currently has right-of-way.
    pub fn active(&self) -> RoadId {
        if self.roads[0].active {
            RoadId::A
        } else {
            RoadId::B
        }
    }

    /// Phases finished so far.
    pub fn phases_completed(&self) -> usize {
        self.phases_completed
    }

    /// Whether a vehicle is between the active road's sensors.
    pub fn in_transit(&self) -> bool {
        self.transit_start.is_some()
    }

    /// Whether the early switch fired this phase.
    pub fn switching(&self) -> bool {
        self.switching
    }

    pub(crate) fn begin_transit(&mut self, at: Duration) {
        self.transit_start = Some(at);
    }

    pub(crate) fn end_transit(&mut self) -> Option<Duration> {
        self.transit_start.take()
    }

    /// Store the active road's sensor levels, returning the rising edges.
    pub(crate) fn sensor_edges(&mut self, entry: bool, exit: bool) -> SensorEdges {
        let edges = SensorEdges {
            entry: entry && !self.entry_level,
            exit: exit && !self.exit_level,
        };
        self.entry_level = entry;
        self.exit_level = exit;
        edges
    }

    /// Latch the early switch. Returns `false` if it already fired this phase.
    pub(crate) fn trigger_switch(&mut self) -> bool {
        !std::mem::replace(&mut self.switching, true)
    }

    /// Clear per-phase flags, hand right-of-way to the other road.
    pub(crate) fn finish_phase(&mut self) {
        self.transit_start = None;
        self.switching = false;
        self.entry_level = false;
        self.exit_level = false;
        let next = self.active().other();
        for road in &mut self.roads {
            road.active = road.id == next;
        }
        self.phases_completed += 1;
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}
