//! Runtime settings shared by the cycle controller and the host application.

use std::time::Duration;

use serde::Deserialize;

use crate::hal::WallTime;

/// Pins of one sensor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorSettings {
    /// Output pin driving the sensor's trigger input.
    pub trigger_pin: u8,
    /// Input pin carrying the echo pulse.
    pub echo_pin: u8,
    /// Distance the host simulation answers with. `None` never echoes.
    #[serde(default)]
    pub simulated_cm: Option<u32>,
}

/// Cycle and loop timing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Deadline for each echo after the trigger.
    pub echo_timeout_ms: u64,
    /// Width of the trigger pulse.
    pub trigger_pulse_us: u64,
    /// Pause after each reported cycle.
    pub cycle_pause_ms: u64,
    /// How long each control loop iteration waits for a key.
    pub poll_timeout_ms: u64,
    /// Extra time the wait loop allows the deadline timers before it
    /// resolves stragglers itself.
    pub wait_grace_ms: u64,
}

impl Timing {
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us)
    }

    pub fn cycle_pause(&self) -> Duration {
        Duration::from_millis(self.cycle_pause_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Upper bound on the wait loop, measured on the monotonic clock.
    pub fn wait_bound(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms.saturating_add(self.wait_grace_ms))
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            echo_timeout_ms: sonar_channel::ECHO_TIMEOUT_MS as u64,
            trigger_pulse_us: sonar_channel::TRIGGER_PULSE_US as u64,
            cycle_pause_ms: 1000,
            poll_timeout_ms: 100,
            wait_grace_ms: 20,
        }
    }
}

/// Wall clock seed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    /// Time of day at start-up.
    pub start: WallTime,
}

impl Default for ClockSettings {
    fn default() -> Self {
        ClockSettings {
            start: WallTime { hour: 11, minute: 50, second: 0 },
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sensors: [SensorSettings; 2],
    pub timing: Timing,
    pub clock: ClockSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sensors: [
                SensorSettings { trigger_pin: 13, echo_pin: 12, simulated_cm: Some(42) },
                SensorSettings { trigger_pin: 19, echo_pin: 18, simulated_cm: None },
            ],
            timing: Timing::default(),
            clock: ClockSettings::default(),
        }
    }
}
