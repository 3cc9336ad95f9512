//! Console records for finished measurement cycles.
//!
//! Two line shapes are relied on by tooling that scrapes the console and must
//! not change:
//!
//! ```text
//! HH:MM:SS - measurement failed
//! Sensor N - dist: D cm
//! ```

use std::io::{self, Write};

use sonar_channel::{ChannelError, Distance};
use tracing::{info, warn};

use crate::hal::{WallClock, WallTime};

/// Result of one sensor in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    /// Sensor number (1-based).
    pub sensor: u8,
    pub result: Result<Distance, ChannelError>,
}

/// Render a reading as a console line (without the newline).
pub fn format_reading(reading: &SensorReading, now: WallTime) -> String {
    match &reading.result {
        Ok(distance) => format!("Sensor {} - dist: {} cm", reading.sensor, distance.cm()),
        Err(ChannelError::MalformedReading { .. }) => {
            format!("{} - Sensor {} - malformed reading", now, reading.sensor)
        }
        Err(_) => format!("{} - measurement failed", now),
    }
}

/// Writes readings and operator notices to a console sink.
pub struct Reporter<W, O> {
    clock: W,
    out: O,
}

impl<W, O> Reporter<W, O>
where
    W: WallClock,
    O: Write,
{
    pub fn new(clock: W, out: O) -> Self {
        Reporter { clock, out }
    }

    /// Emit one reading, prefixed by the current wall time where the line
    /// shape calls for it.
    pub fn report(&mut self, reading: &SensorReading) -> io::Result<()> {
        let now = self.clock.now();
        match &reading.result {
            Ok(distance) => {
                info!(sensor = reading.sensor, distance_cm = distance.cm(), "Distance measured")
            }
            Err(ChannelError::MalformedReading { start_us, end_us }) => warn!(
                sensor = reading.sensor,
                start_us,
                end_us,
                %now,
                "Discarding malformed echo"
            ),
            Err(err) => info!(sensor = reading.sensor, %now, error = %err, "Measurement failed"),
        }
        writeln!(self.out, "{}", format_reading(reading, now))?;
        self.out.flush()
    }

    /// Emit a free-form operator line.
    pub fn notice(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message)?;
        self.out.flush()
    }

    pub fn sink(&self) -> &O {
        &self.out
    }

    pub fn into_inner(self) -> O {
        self.out
    }
}
