//! Simulated intersection.
//!
//! Generates vehicle passages on both roads so the controller can run without
//! a board attached. Each road sees vehicles arrive after a random gap; a
//! vehicle trips the entry sensor, travels the inter-sensor distance at a
//! random speed, then trips the exit sensor. Signals are accepted and logged
//! but do not influence traffic.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::SimulationSettings;
use crate::hardware::{
    DigitalIo, Direction, HardwareError, HwResult, IntersectionLines, LineId, RoadId, RoadLines,
};

/// How long a sensor stays asserted while a vehicle crosses it.
pub const SENSOR_PULSE: Duration = Duration::from_millis(30);

#[derive(Debug, Clone, Copy)]
struct Passage {
    enters: Duration,
    exits: Duration,
}

#[derive(Debug)]
struct Lane {
    lines: RoadLines,
    next_arrival: Duration,
    passage: Option<Passage>,
}

/// Random traffic behind the [`DigitalIo`] capability.
pub struct SimulatedIntersection<C: Clock> {
    clock: C,
    rng: StdRng,
    profile: SimulationSettings,
    distance_m: f64,
    lanes: [Lane; 2],
    outputs: HashMap<LineId, bool>,
    directions: HashMap<LineId, Direction>,
}

impl<C: Clock> SimulatedIntersection<C> {
    /// Simulator with both roads idle until their first random arrival.
    pub fn new(
        clock: C,
        lines: IntersectionLines,
        distance_m: f64,
        profile: SimulationSettings,
    ) -> Self {
        let mut rng = match profile.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let start = clock.now();
        let lanes = [RoadId::A, RoadId::B].map(|road| Lane {
            lines: lines.road(road),
            next_arrival: start + random_gap(&mut rng, &profile),
            passage: None,
        });

        Self {
            clock,
            rng,
            profile,
            distance_m,
            lanes,
            outputs: HashMap::new(),
            directions: HashMap::new(),
        }
    }

    /// Last level written to an output line.
    pub fn output(&self, line: LineId) -> Option<bool> {
        self.outputs.get(&line).copied()
    }

    fn advance_lane(&mut self, slot: usize, now: Duration) {
        let lane = &mut self.lanes[slot];

        if let Some(passage) = lane.passage {
            if now >= passage.exits + SENSOR_PULSE {
                lane.passage = None;
                lane.next_arrival = now + random_gap(&mut self.rng, &self.profile);
            }
        }

        if lane.passage.is_none() && now >= lane.next_arrival {
            let speed = self
                .rng
                .gen_range(self.profile.min_speed_mps..=self.profile.max_speed_mps);
            let transit = Duration::from_secs_f64(self.distance_m / speed);
            trace!(entry = %lane.lines.entry, speed_mps = speed, "Simulated vehicle arriving");
            lane.passage = Some(Passage {
                enters: now,
                exits: now + transit,
            });
        }
    }
}

fn random_gap(rng: &mut StdRng, profile: &SimulationSettings) -> Duration {
    let mean = profile.mean_gap_ms as f64;
    Duration::from_secs_f64(rng.gen_range(0.5 * mean..=1.5 * mean) / 1000.0)
}

fn pulsing(start: Duration, now: Duration) -> bool {
    now >= start && now < start + SENSOR_PULSE
}

impl<C: Clock> DigitalIo for SimulatedIntersection<C> {
    fn request_line(&mut self, line: LineId) -> HwResult<()> {
        debug!(%line, "Simulated line requested");
        Ok(())
    }

    fn set_direction(&mut self, line: LineId, direction: Direction) -> HwResult<()> {
        self.directions.insert(line, direction);
        Ok(())
    }

    fn read_line(&mut self, line: LineId) -> HwResult<bool> {
        let now = self.clock.now();
        let slot = self
            .lanes
            .iter()
            .position(|lane| lane.lines.entry == line || lane.lines.exit == line)
            .ok_or_else(|| HardwareError::Fault {
                line,
                message: "not a sensor line".into(),
            })?;

        self.advance_lane(slot, now);

        let lane = &self.lanes[slot];
        Ok(match lane.passage {
            Some(passage) if line == lane.lines.entry => pulsing(passage.enters, now),
            Some(passage) => pulsing(passage.exits, now),
            None => false,
        })
    }

    fn write_line(&mut self, line: LineId, value: bool) -> HwResult<()> {
        if self.directions.get(&line) != Some(&Direction::Output) {
            return Err(HardwareError::WrongDirection {
                line,
                expected: Direction::Output,
                actual: self.directions.get(&line).copied().unwrap_or_default(),
            });
        }
        debug!(%line, value, "Simulated signal write");
        self.outputs.insert(line, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppingClock;
    use crate::config::PinSettings;
    use std::sync::Arc;

    fn intersection(
        clock: Arc<SteppingClock>,
    ) -> (SimulatedIntersection<Arc<SteppingClock>>, IntersectionLines) {
        let lines = IntersectionLines::from(&PinSettings::default());
        let profile = SimulationSettings {
            seed: Some(11),
            mean_gap_ms: 500,
            min_speed_mps: 0.2,
            max_speed_mps: 0.5,
        };
        (SimulatedIntersection::new(clock, lines, 0.14, profile), lines)
    }

    #[test]
    fn exit_follows_entry_at_plausible_speed() {
        let clock = Arc::new(SteppingClock::new(Duration::from_millis(1)));
        let (mut sim, lines) = intersection(Arc::clone(&clock));
        let road = lines.road(RoadId::A);

        let (mut entry_was, mut exit_was) = (false, false);
        let mut entered_at = None;
        let mut transits = Vec::new();

        for _ in 0..20_000 {
            let entry = sim.read_line(road.entry).unwrap();
            let exit = sim.read_line(road.exit).unwrap();
            let at = clock.last_reading();

            if entry && !entry_was {
                entered_at = Some(at);
            }
            if exit && !exit_was {
                let start = entered_at.take().expect("exit without entry");
                transits.push((at - start).as_secs_f64());
            }
            entry_was = entry;
            exit_was = exit;
        }

        assert!(!transits.is_empty());
        for transit in transits {
            let speed = 0.14 / transit;
            assert!((0.19..=0.51).contains(&speed), "speed {speed}");
        }
    }

    #[test]
    fn signal_lines_are_not_sensors() {
        let clock = Arc::new(SteppingClock::new(Duration::from_millis(1)));
        let (mut sim, lines) = intersection(clock);

        assert!(sim.read_line(lines.go).is_err());

        sim.set_direction(lines.go, Direction::Output).unwrap();
        sim.write_line(lines.go, true).unwrap();
        assert_eq!(sim.output(lines.go), Some(true));
    }
}
