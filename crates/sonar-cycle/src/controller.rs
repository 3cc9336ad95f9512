use std::io::Write;
use std::sync::atomic::{Ordering, fence};

use tracing::{debug, warn};

use crate::hal::{Board, WallClock};
use crate::reporter::{Reporter, SensorReading};
use crate::sensor::Sensor;
use crate::settings::Timing;

/// Outcome of one measurement round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub readings: [SensorReading; 2],
    /// Set when the wait bound expired and the controller resolved a
    /// channel itself because its deadline timer never fired.
    pub forced: bool,
    /// Monotonic time from arming the deadlines to resolution, in µs.
    pub elapsed_us: u64,
}

/// Runs measurement rounds across both sensors.
pub struct CycleController<B, W, O> {
    board: B,
    sensors: [Sensor; 2],
    reporter: Reporter<W, O>,
    timing: Timing,
}

impl<B, W, O> CycleController<B, W, O>
where
    B: Board,
    W: WallClock,
    O: Write,
{
    pub fn new(board: B, sensors: [Sensor; 2], reporter: Reporter<W, O>, timing: Timing) -> Self {
        CycleController { board, sensors, reporter, timing }
    }

    /// Run one round: arm, trigger, wait, cancel, report, pause.
    ///
    /// Never fails. A channel without a usable echo yields an error reading
    /// for this round only.
    pub fn run_cycle(&mut self) -> CycleReport {
        let CycleController { board, sensors, reporter, timing } = self;

        for sensor in sensors.iter() {
            sensor.channel().arm();
        }
        // The reset must be visible before any deadline or edge can land.
        fence(Ordering::SeqCst);

        let handles = sensors
            .each_ref()
            .map(|sensor| board.arm_once(timing.echo_timeout(), sensor.timeout_callback()));
        let started = board.now_us();

        // Sequential on purpose: sensor 2 fires one hold time after sensor 1.
        for sensor in sensors.iter() {
            sensor.trigger(board, timing.trigger_pulse());
        }

        let bound_us = u64::try_from(timing.wait_bound().as_micros()).unwrap_or(u64::MAX);
        let mut forced = false;
        let mut spins: u64 = 0;
        while !sensors.iter().all(|sensor| sensor.channel().is_resolved()) {
            if board.now_us().saturating_sub(started) > bound_us {
                for sensor in sensors.iter() {
                    if sensor.channel().on_timeout() {
                        warn!(sensor = sensor.id(), bound_us, "Echo deadline never fired, forcing timeout");
                    }
                }
                forced = true;
                break;
            }
            board.relax();
            spins += 1;
        }
        let elapsed_us = board.now_us().saturating_sub(started);

        // A pending deadline, late or lost, must not reach the next round.
        for handle in &handles {
            board.cancel(handle);
        }
        debug!(elapsed_us, spins, forced, "Cycle resolved");

        let readings = sensors.each_ref().map(|sensor| SensorReading {
            sensor: sensor.id(),
            result: sensor.reading(),
        });
        for reading in &readings {
            if let Err(e) = reporter.report(reading) {
                warn!(sensor = reading.sensor, error = %e, "Failed to write reading");
            }
        }

        board.delay(timing.cycle_pause());

        CycleReport { readings, forced, elapsed_us }
    }

    pub fn sensors(&self) -> &[Sensor; 2] {
        &self.sensors
    }

    pub fn reporter(&self) -> &Reporter<W, O> {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut Reporter<W, O> {
        &mut self.reporter
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }
}
