//! Phase Controller
//!
//! Drives the intersection through a fixed number of phases, alternating
//! right-of-way between road A and road B, starting with A.
//!
//! ## Phase protocol
//!
//! ```text
//! entry:   opposing stop high -> clearance delay -> entering stop low, go high
//! polling: read entry / exit / cross-traffic demand until the budget is spent
//! exit:    clear flags -> statistics (or "no vehicles" warning) -> report -> flip
//! ```
//!
//! The polling loop takes exactly one clock reading per iteration and uses it
//! for the budget check and for any transit timestamp. A demand on the other
//! road's entry sensor shortens the remaining phase to the early-switch
//! duration, at most once per phase.
//!
//! Nothing that happens during a run is fatal: sensor faults skip the
//! iteration, signal faults are logged, report failures are logged.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut controller = PhaseController::new(
//!     ControllerConfig::from(&settings),
//!     SysfsGpio::default(),
//!     MonotonicClock::new(),
//!     TextReport::append_to("log.txt", true)?,
//! );
//! let summary = controller.run();
//! ```

mod state;

pub use state::{ControllerState, Interval, Road};

use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::clock::Clock;
use crate::config::{SensorSettings, Settings, TimingSettings};
use crate::hardware::{
    DigitalIo, Direction, HwResult, IntersectionLines, LineId, RoadId, RoadLines,
};
use crate::report::ReportSink;

/// Rounding slack, in units of the limit's last place, allowed before a
/// speed counts as over the limit.
pub const SPEED_LIMIT_ULPS: f64 = 4.0;

/// Speed in m/s for a vehicle covering `distance_m` in `elapsed`.
///
/// `None` for a zero transit time.
pub fn derive_speed(distance_m: f64, elapsed: Duration) -> Option<f64> {
    if elapsed.is_zero() {
        return None;
    }
    Some(distance_m / elapsed.as_secs_f64())
}

/// Whether `speed` is strictly above `limit`, ignoring rounding noise.
pub fn exceeds_limit(speed: f64, limit: f64) -> bool {
    speed - limit > limit.abs() * f64::EPSILON * SPEED_LIMIT_ULPS
}

/// What the controller needs from [`Settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Sensor and signal lines
    pub lines: IntersectionLines,
    /// Delays, phase budgets and phase count
    pub timing: TimingSettings,
    /// Sensor spacing and speed limit
    pub sensors: SensorSettings,
}

impl From<&Settings> for ControllerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            lines: IntersectionLines::from(&settings.pins),
            timing: settings.timing.clone(),
            sensors: settings.sensors.clone(),
        }
    }
}

/// Outcome of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    /// Road that held right-of-way
    pub road: RoadId,
    /// Interval number on that road
    pub interval: usize,
    /// Vehicles timed between the sensors
    pub vehicles: usize,
    /// Cross-traffic demand shortened this phase
    pub early_switch: bool,
    /// Time spent in the polling loop
    pub polled: Duration,
    /// Poll iterations skipped because a sensor read failed
    pub read_faults: usize,
}

/// Per-phase outcomes of a whole run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// One entry per completed phase
    pub phases: Vec<PhaseSummary>,
}

impl RunSummary {
    /// Which road held right-of-way in each phase.
    pub fn active_sequence(&self) -> Vec<RoadId> {
        self.phases.iter().map(|p| p.road).collect()
    }

    /// Vehicles timed over the whole run.
    pub fn total_vehicles(&self) -> usize {
        self.phases.iter().map(|p| p.vehicles).sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct SensorSample {
    entry: bool,
    exit: bool,
    demand: bool,
}

#[derive(Debug, Clone, Copy)]
struct PollOutcome {
    early_switch: bool,
    polled: Duration,
    read_faults: usize,
}

/// Sequential controller for one intersection.
pub struct PhaseController<H, C, R> {
    io: H,
    clock: C,
    sink: R,
    config: ControllerConfig,
    state: ControllerState,
}

impl<H: DigitalIo, C: Clock, R: ReportSink> PhaseController<H, C, R> {
    /// Controller in its initial state, road A first.
    pub fn new(config: ControllerConfig, io: H, clock: C, sink: R) -> Self {
        Self {
            io,
            clock,
            sink,
            config,
            state: ControllerState::new(),
        }
    }

    /// Run state so far.
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// The hardware backend.
    pub fn io(&self) -> &H {
        &self.io
    }

    /// The report sink.
    pub fn sink(&self) -> &R {
        &self.sink
    }

    /// Tear down, returning the hardware, clock, sink and final state.
    pub fn into_parts(self) -> (H, C, R, ControllerState) {
        (self.io, self.clock, self.sink, self.state)
    }

    /// Run every remaining phase, then halt.
    pub fn run(&mut self) -> RunSummary {
        self.configure_lines();

        if let Err(error) = self.sink.begin_run(Local::now()) {
            warn!(%error, "Failed to write run header");
        }

        self.clock.delay(self.config.timing.startup_delay());
        info!(phases = self.config.timing.phases, "Smart traffic beginning");

        let mut summary = RunSummary::default();
        while self.state.phases_completed() < self.config.timing.phases {
            summary.phases.push(self.run_phase());
        }

        info!(
            vehicles = summary.total_vehicles(),
            "All phases complete, controller halted"
        );
        summary
    }

    /// Request every line, set directions, start with both stops low and go high.
    pub fn configure_lines(&mut self) {
        let lines = self.config.lines;
        for line in lines.inputs() {
            self.claim(line, Direction::Input);
        }
        for line in lines.outputs() {
            self.claim(line, Direction::Output);
        }
        self.drive(lines.road_a.stop, false);
        self.drive(lines.road_b.stop, false);
        self.drive(lines.go, true);
    }

    fn claim(&mut self, line: LineId, direction: Direction) {
        let result = self
            .io
            .request_line(line)
            .and_then(|()| self.io.set_direction(line, direction));
        if let Err(error) = result {
            warn!(%line, ?direction, %error, "Failed to configure line");
        }
    }

    fn drive(&mut self, line: LineId, value: bool) {
        if let Err(error) = self.io.write_line(line, value) {
            warn!(%line, value, %error, "Failed to drive signal");
        }
    }

    fn run_phase(&mut self) -> PhaseSummary {
        let road = self.state.active();
        let mut interval = Interval::new(road, self.state.road(road).next_index());

        let span = info_span!("phase", %road, interval = interval.index());
        let _guard = span.enter();
        info!("Phase started");

        self.enter_phase(road);
        let outcome = self.poll(road, &mut interval);
        self.close_phase(interval, outcome)
    }

    fn enter_phase(&mut self, road: RoadId) {
        info!("Switching signals");
        let lines = self.config.lines;
        self.drive(lines.road(road.other()).stop, true);
        self.clock.delay(self.config.timing.clearance());
        self.drive(lines.road(road).stop, false);
        self.drive(lines.go, true);
    }

    fn poll(&mut self, road: RoadId, interval: &mut Interval) -> PollOutcome {
        let lines = self.config.lines.road(road);
        let demand = self.config.lines.road(road.other()).entry;

        let started = self.clock.now();
        let mut baseline = started;
        let mut budget = self.config.timing.phase();
        let mut read_faults = 0;

        loop {
            let now = self.clock.now();
            if now.saturating_sub(baseline) >= budget {
                return PollOutcome {
                    early_switch: self.state.switching(),
                    polled: now.saturating_sub(started),
                    read_faults,
                };
            }

            let sample = match self.sample(lines, demand) {
                Ok(sample) => sample,
                Err(error) => {
                    read_faults += 1;
                    debug!(%error, "Sensor read failed, skipping poll iteration");
                    continue;
                }
            };

            if sample.demand && self.state.trigger_switch() {
                info!("Vehicle waiting on cross road, changing signals shortly");
                baseline = now;
                budget = self.config.timing.early_switch();
            }

            let edges = self.state.sensor_edges(sample.entry, sample.exit);
            if edges.entry && !self.state.in_transit() {
                debug!("Vehicle entered");
                self.state.begin_transit(now);
            } else if edges.exit {
                if let Some(entered) = self.state.end_transit() {
                    self.record_passage(interval, now.saturating_sub(entered));
                }
            }
        }
    }

    fn sample(&mut self, lines: RoadLines, demand: LineId) -> HwResult<SensorSample> {
        Ok(SensorSample {
            entry: self.io.read_line(lines.entry)?,
            exit: self.io.read_line(lines.exit)?,
            demand: self.io.read_line(demand)?,
        })
    }

    fn record_passage(&mut self, interval: &mut Interval, transit: Duration) {
        let Some(speed) = derive_speed(self.config.sensors.distance_m, transit) else {
            warn!("Vehicle left with zero transit time, sample discarded");
            return;
        };

        interval.record(speed);
        let vehicle = interval.vehicle_count();
        info!(
            vehicle,
            transit_s = transit.as_secs_f64(),
            speed_mps = speed,
            "Vehicle left"
        );

        let limit = self.config.sensors.speed_limit_mps;
        if exceeds_limit(speed, limit) {
            warn!(
                vehicle,
                speed_mps = speed,
                limit_mps = limit,
                "Vehicle exceeded the speed limit"
            );
        }
    }

    fn close_phase(&mut self, interval: Interval, outcome: PollOutcome) -> PhaseSummary {
        let road = interval.road();
        let summary = PhaseSummary {
            road,
            interval: interval.index(),
            vehicles: interval.vehicle_count(),
            early_switch: outcome.early_switch,
            polled: outcome.polled,
            read_faults: outcome.read_faults,
        };

        if outcome.read_faults > 0 {
            warn!(read_faults = outcome.read_faults, "Sensor reads failed during phase");
        }

        if summary.vehicles == 0 {
            warn!("No vehicles passed during interval, no statistics recorded");
            self.state.road_mut(road).close_empty(interval);
        } else if let Err(error) = self.state.road_mut(road).close_interval(interval) {
            warn!(%error, "Failed to compute interval statistics");
        } else if let Some(report) = self.state.road(road).latest_report() {
            if let Err(error) = self.sink.interval_completed(&report) {
                warn!(%error, "Failed to write interval report");
            }
        }

        self.state.finish_phase();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppingClock;
    use crate::config::PinSettings;
    use crate::hardware::mock::MockGpio;
    use crate::report::{IntervalReport, ReportError};
    use crate::statistics::Statistics;
    use chrono::DateTime;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[derive(Debug, Clone)]
    struct Reported {
        road: RoadId,
        interval: usize,
        speeds: Vec<f64>,
        overall: Statistics,
        slowest: usize,
        fastest: usize,
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        headers: usize,
        intervals: Vec<Reported>,
    }

    impl ReportSink for RecordingSink {
        fn begin_run(&mut self, _started: DateTime<Local>) -> Result<(), ReportError> {
            self.headers += 1;
            Ok(())
        }

        fn interval_completed(&mut self, report: &IntervalReport<'_>) -> Result<(), ReportError> {
            self.intervals.push(Reported {
                road: report.road,
                interval: report.interval.index(),
                speeds: report.interval.speeds().to_vec(),
                overall: report.overall.clone(),
                slowest: report.slowest_interval,
                fastest: report.fastest_interval,
            });
            Ok(())
        }
    }

    type TestController = PhaseController<MockGpio, Arc<SteppingClock>, RecordingSink>;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn lines() -> IntersectionLines {
        IntersectionLines::from(&PinSettings::default())
    }

    fn config(phase_ms: u64, early_switch_ms: u64, phases: usize) -> ControllerConfig {
        ControllerConfig {
            lines: lines(),
            timing: TimingSettings {
                startup_delay_ms: 0,
                clearance_ms: 0,
                phase_ms,
                early_switch_ms,
                phases,
            },
            sensors: SensorSettings::default(),
        }
    }

    // With zero start-up and clearance delays and a 1 ms step, phase 1 polls
    // at t = 5, 6, ... ms and stops when t - 4 reaches the budget.
    fn controller(
        config: ControllerConfig,
        script: impl FnOnce(MockGpio) -> MockGpio,
    ) -> TestController {
        let clock = Arc::new(SteppingClock::new(ms(1)));
        let gpio = script(MockGpio::new(Arc::clone(&clock)));
        PhaseController::new(config, gpio, clock, RecordingSink::default())
    }

    /// Vehicle on `road` tripping entry at `entry` ms and exit at `exit` ms.
    fn vehicle(gpio: MockGpio, road: RoadId, entry: u64, exit: u64) -> MockGpio {
        let lines = lines().road(road);
        gpio.pulse(lines.entry, ms(entry), ms(3))
            .pulse(lines.exit, ms(exit), ms(3))
    }

    #[test]
    fn speed_derivation() {
        let speed = derive_speed(0.14, ms(400)).unwrap();
        assert!((speed - 0.35).abs() < 1e-12);
        assert!(!exceeds_limit(speed, 0.35));
        assert!(exceeds_limit(0.36, 0.35));
        assert!(exceeds_limit(0.350001, 0.35));
        // One nanosecond short of 0.4 s is genuinely faster
        let just_over = derive_speed(0.14, Duration::from_nanos(399_999_999)).unwrap();
        assert!(exceeds_limit(just_over, 0.35));
        assert_eq!(derive_speed(0.14, Duration::ZERO), None);
    }

    #[test]
    fn phases_alternate_starting_with_road_a() {
        let mut controller = controller(config(100, 20, 4), |gpio| gpio);
        let summary = controller.run();

        assert_eq!(
            summary.active_sequence(),
            vec![RoadId::A, RoadId::B, RoadId::A, RoadId::B]
        );
        assert_eq!(
            summary.phases.iter().map(|p| p.interval).collect::<Vec<_>>(),
            vec![1, 1, 2, 2]
        );
        assert!(summary.phases.iter().all(|p| p.polled == ms(100)));

        let state = controller.state();
        assert_eq!(state.phases_completed(), 4);
        assert_eq!(state.road(RoadId::A).intervals().len(), 2);
        assert_eq!(state.road(RoadId::B).intervals().len(), 2);
        assert_eq!(controller.sink().headers, 1);
    }

    #[test]
    fn signals_follow_phase_protocol() {
        let mut controller = controller(config(50, 10, 2), |gpio| gpio);
        controller.run();

        let (a_stop, b_stop, go) = (LineId(19), LineId(18), LineId(0));
        let writes: Vec<_> = controller
            .io()
            .writes()
            .iter()
            .map(|w| (w.line, w.value))
            .collect();
        assert_eq!(
            writes,
            vec![
                // initial setup
                (a_stop, false),
                (b_stop, false),
                (go, true),
                // phase 1, road A
                (b_stop, true),
                (a_stop, false),
                (go, true),
                // phase 2, road B
                (a_stop, true),
                (b_stop, false),
                (go, true),
            ]
        );

        let io = controller.io();
        for line in lines().inputs() {
            assert!(io.is_requested(line));
            assert_eq!(io.direction(line), Some(Direction::Input));
        }
        for line in lines().outputs() {
            assert!(io.is_requested(line));
            assert_eq!(io.direction(line), Some(Direction::Output));
        }
    }

    #[test]
    fn early_switch_fires_once_per_phase() {
        let demand = lines().road(RoadId::B).entry;
        let mut controller = controller(config(100, 20, 2), |gpio| {
            gpio.assert_between(demand, ms(30), ms(33))
                .assert_between(demand, ms(40), ms(43))
        });
        let summary = controller.run();

        let first = &summary.phases[0];
        assert!(first.early_switch);
        // Demand at 30 ms leaves 20 ms; the repeat at 40 ms changes nothing.
        assert_eq!(first.polled, ms(46));

        let second = &summary.phases[1];
        assert!(!second.early_switch);
        assert_eq!(second.polled, ms(100));
    }

    #[test]
    #[traced_test]
    fn transit_at_limit_is_recorded_without_warning() {
        let mut controller = controller(config(1000, 100, 1), |gpio| {
            vehicle(gpio, RoadId::A, 10, 410)
        });
        let summary = controller.run();

        assert_eq!(summary.phases[0].vehicles, 1);
        let interval = &controller.state().road(RoadId::A).intervals()[0];
        assert!((interval.speeds()[0] - 0.35).abs() < 1e-9);
        assert!(logs_contain("Vehicle left"));
        assert!(!logs_contain("exceeded the speed limit"));
    }

    #[test]
    #[traced_test]
    fn fast_vehicle_warns_but_is_kept() {
        let mut controller = controller(config(1000, 100, 1), |gpio| {
            let gpio = vehicle(gpio, RoadId::A, 10, 410);
            vehicle(gpio, RoadId::A, 500, 800)
        });
        controller.run();

        let interval = &controller.state().road(RoadId::A).intervals()[0];
        assert_eq!(interval.vehicle_count(), 2);
        assert!((interval.speeds()[1] - 0.14 / 0.3).abs() < 1e-9);
        assert!(logs_contain("exceeded the speed limit"));

        let reported = &controller.sink().intervals[0];
        assert_eq!(reported.speeds, interval.speeds());
        let stats = interval.statistics().unwrap();
        assert_eq!(stats.max_index, 2);
        assert_eq!(stats.min_index, 1);
    }

    #[test]
    #[traced_test]
    fn entry_held_past_exit_counts_one_vehicle() {
        let road = lines().road(RoadId::A);
        let mut controller = controller(config(1000, 100, 1), |gpio| {
            gpio.assert_between(road.entry, ms(10), ms(500))
                .assert_between(road.exit, ms(400), ms(430))
        });
        let summary = controller.run();

        assert_eq!(summary.phases[0].vehicles, 1);
        let speeds = controller.state().road(RoadId::A).intervals()[0].speeds();
        assert_eq!(speeds.len(), 1);
        assert!((speeds[0] - 0.14 / 0.39).abs() < 1e-9);
        assert!(logs_contain("Vehicle left"));
    }

    #[test]
    fn exit_held_by_waiting_vehicle_does_not_close_next_transit() {
        // The second vehicle enters while the exit sensor is still held high;
        // without a fresh exit edge it never completes.
        let road = lines().road(RoadId::A);
        let mut controller = controller(config(1000, 100, 1), |gpio| {
            gpio.pulse(road.entry, ms(10), ms(3))
                .assert_between(road.exit, ms(410), ms(900))
                .pulse(road.entry, ms(600), ms(3))
        });
        let summary = controller.run();

        assert_eq!(summary.phases[0].vehicles, 1);
        let speeds = controller.state().road(RoadId::A).intervals()[0].speeds();
        assert!((speeds[0] - 0.35).abs() < 1e-9);
    }

    #[test]
    fn exit_without_entry_is_ignored() {
        let exit = lines().road(RoadId::A).exit;
        let mut controller = controller(config(100, 20, 1), |gpio| {
            gpio.pulse(exit, ms(20), ms(3))
        });
        let summary = controller.run();
        assert_eq!(summary.total_vehicles(), 0);
    }

    #[test]
    fn sensors_of_idle_road_are_not_sampled_for_vehicles() {
        // Road B vehicle during road A's phase only counts as demand.
        let mut controller = controller(config(1000, 100, 1), |gpio| {
            vehicle(gpio, RoadId::B, 10, 60)
        });
        let summary = controller.run();
        assert_eq!(summary.total_vehicles(), 0);
        assert!(summary.phases[0].early_switch);
    }

    #[test]
    #[traced_test]
    fn empty_phases_skip_statistics_and_reporting() {
        let mut controller = controller(config(100, 20, 4), |gpio| gpio);
        let summary = controller.run();

        assert_eq!(summary.phases.len(), 4);
        assert!(controller.sink().intervals.is_empty());
        for road in [RoadId::A, RoadId::B] {
            let road = controller.state().road(road);
            assert!(road.intervals().iter().all(|i| i.statistics().is_none()));
            assert!(road.overall().is_none());
        }
        assert!(logs_contain("No vehicles passed during interval"));
    }

    #[test]
    fn overall_statistics_track_interval_means() {
        // Phase 1 (road A) starts polling at 5 ms, phase 3 (road A again) at
        // 2011 ms; phase 2 belongs to road B and stays empty.
        let mut controller = controller(config(1000, 100, 3), |gpio| {
            let gpio = vehicle(gpio, RoadId::A, 10, 410);
            let gpio = vehicle(gpio, RoadId::A, 2100, 2380);
            vehicle(gpio, RoadId::A, 2500, 2780)
        });
        controller.run();

        let road = controller.state().road(RoadId::A);
        assert_eq!(road.interval_means().len(), 2);
        let overall = road.overall().unwrap();
        assert!((overall.min - 0.35).abs() < 1e-9);
        assert!((overall.max - 0.5).abs() < 1e-9);

        let sink = controller.sink();
        assert_eq!(sink.intervals.len(), 2);
        let last = &sink.intervals[1];
        assert_eq!((last.road, last.interval), (RoadId::A, 2));
        assert_eq!((last.slowest, last.fastest), (1, 2));
        assert_eq!(last.overall.count, 2);
    }

    #[test]
    fn slowest_and_fastest_name_intervals_after_an_empty_one() {
        // Road A's first interval is empty; its second is the only mean.
        let mut controller = controller(config(1000, 100, 3), |gpio| {
            vehicle(gpio, RoadId::A, 2100, 2500)
        });
        controller.run();

        let reported = &controller.sink().intervals[0];
        assert_eq!(reported.interval, 2);
        assert_eq!((reported.slowest, reported.fastest), (2, 2));
        assert!(reported.overall.std_dev_undefined);
    }

    #[test]
    #[traced_test]
    fn sensor_faults_skip_iterations_without_ending_the_run() {
        let exit = lines().road(RoadId::A).exit;
        let mut controller = controller(config(100, 20, 2), |gpio| {
            gpio.fail_reads_between(exit, ms(10), ms(60))
        });
        let summary = controller.run();

        assert_eq!(summary.phases.len(), 2);
        assert_eq!(summary.phases[0].read_faults, 50);
        assert_eq!(summary.phases[0].polled, ms(100));
        assert_eq!(summary.phases[1].read_faults, 0);
        assert!(logs_contain("Sensor reads failed during phase"));
    }

    #[test]
    #[traced_test]
    fn signal_faults_are_logged_and_ignored() {
        let mut controller = controller(config(50, 10, 2), |gpio| gpio.fail_writes_to(LineId(0)));
        let summary = controller.run();

        assert_eq!(summary.phases.len(), 2);
        assert!(logs_contain("Failed to drive signal"));
    }

    #[test]
    fn vehicle_in_transit_at_phase_end_is_dropped() {
        // Enters near the end of phase 1; the exit lands in phase 2 where
        // road A is no longer sampled.
        let mut controller = controller(config(100, 20, 2), |gpio| {
            vehicle(gpio, RoadId::A, 90, 120)
        });
        let summary = controller.run();

        assert_eq!(summary.total_vehicles(), 0);
        assert!(!controller.state().in_transit());
    }
}
