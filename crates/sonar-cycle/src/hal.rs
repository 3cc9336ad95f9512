//! Capabilities the measurement core consumes from the platform.
//!
//! Real boards, the host application and the [`crate::sim`] bench all
//! implement these traits, so the cycle logic never touches hardware directly.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Handler invoked from interrupt context with the edge timestamp (µs).
pub type EdgeCallback = Box<dyn Fn(u64) + Send + Sync + 'static>;

/// Handler invoked once when a deadline expires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Free-running microsecond counter.
pub trait MonotonicClock {
    /// Microseconds since boot. Never decreases.
    fn now_us(&self) -> u64;
}

/// Digital output pin writes.
pub trait DigitalOutput {
    /// Drive `pin` high (`true`) or low (`false`).
    fn set(&mut self, pin: u8, level: bool);
}

/// Edge interrupt subscription on digital inputs.
pub trait EdgeInterrupts {
    /// Deliver rising and falling edges on `pin` to the given handlers.
    fn subscribe(&mut self, pin: u8, on_rising: EdgeCallback, on_falling: EdgeCallback);
}

/// Single-shot deadline timers.
pub trait DeadlineTimer {
    /// Identifies an armed deadline.
    type Handle;

    /// Run `callback` once after `duration`, unless cancelled first.
    fn arm_once(&mut self, duration: Duration, callback: TimerCallback) -> Self::Handle;

    /// Cancel a deadline. Idempotent, and harmless after the deadline fired.
    fn cancel(&mut self, handle: &Self::Handle);
}

/// Blocking delays.
pub trait Delay {
    /// Block for at least `duration`.
    fn delay(&mut self, duration: Duration);
}

/// Cooperative yield used inside busy-wait loops.
pub trait Relax {
    /// Give pending interrupts and other work a chance to run.
    fn relax(&mut self);
}

/// Time-of-day source used for log prefixes.
pub trait WallClock {
    /// Current time of day.
    fn now(&self) -> WallTime;
}

/// Keystroke source for start/stop control.
pub trait CommandInput {
    /// Wait up to `timeout` for a key.
    fn poll(&mut self, timeout: Duration) -> Option<char>;
}

/// Everything the measurement cycle drives.
pub trait Board: MonotonicClock + DigitalOutput + DeadlineTimer + Delay + Relax {}

impl<T> Board for T where T: MonotonicClock + DigitalOutput + DeadlineTimer + Delay + Relax {}

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Hour, minute and second of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(try_from = "String")]
pub struct WallTime {
    /// Hour, `0..24`.
    pub hour: u8,
    /// Minute, `0..60`.
    pub minute: u8,
    /// Second, `0..60`.
    pub second: u8,
}

impl WallTime {
    /// Construct a time of day, or `None` if a field is out of range.
    pub fn new(hour: u8, minute: u8, second: u8) -> Option<Self> {
        (hour < 24 && minute < 60 && second < 60).then_some(WallTime { hour, minute, second })
    }

    /// Seconds since midnight.
    pub fn seconds_of_day(&self) -> u64 {
        self.hour as u64 * 3600 + self.minute as u64 * 60 + self.second as u64
    }

    /// The time of day `seconds` later, wrapping at midnight.
    pub fn plus_seconds(&self, seconds: u64) -> Self {
        let total = (self.seconds_of_day() + seconds % SECONDS_PER_DAY) % SECONDS_PER_DAY;
        WallTime {
            hour: (total / 3600) as u8,
            minute: (total / 60 % 60) as u8,
            second: (total % 60) as u8,
        }
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Error returned when parsing a `HH:MM:SS` string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWallTimeError(String);

impl fmt::Display for ParseWallTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day {:?}, expected HH:MM:SS", self.0)
    }
}

impl std::error::Error for ParseWallTimeError {}

impl FromStr for WallTime {
    type Err = ParseWallTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseWallTimeError(s.to_string());
        let mut parts = s.trim().split(':').map(|p| p.parse::<u8>());
        let (Some(Ok(hour)), Some(Ok(minute)), Some(Ok(second)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        WallTime::new(hour, minute, second).ok_or_else(err)
    }
}

impl TryFrom<String> for WallTime {
    type Error = ParseWallTimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
