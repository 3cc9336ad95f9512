#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` pulse-timing state machine for one ultrasonic sensor channel."]
#![doc = ""]
#![doc = "A channel is written from interrupt context (edge and timeout callbacks)"]
#![doc = "and read from the main flow, so every field is an atomic. No locks are taken."]

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use portable_atomic::AtomicU64;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::ChannelError;

/// Speed of sound in air, in centimeters per microsecond (343 m/s).
pub const SPEED_OF_SOUND_CM_PER_US: f64 = 0.0343;

/// Width of the trigger pulse required by the sensor, in microseconds.
pub const TRIGGER_PULSE_US: u32 = 10;

/// Time allowed for the echo to complete after a trigger, in milliseconds.
pub const ECHO_TIMEOUT_MS: u32 = 30;

const PENDING: u8 = 0;
const ECHOED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// A measured distance, truncated to whole centimeters.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Distance {
    cm: u32,
}

impl Distance {
    /// Construct a distance from whole centimeters.
    pub const fn from_cm(cm: u32) -> Self {
        Distance { cm }
    }

    /// Converts a round-trip echo width into a one-way distance.
    ///
    /// `distance = elapsed * 0.0343 / 2`, truncated toward zero.
    /// The result saturates at `u32::MAX` centimeters.
    ///
    /// # Arguments
    ///
    /// * `elapsed_us`: Echo pulse width in microseconds.
    pub fn from_echo_us(elapsed_us: u64) -> Self {
        let cm = elapsed_us as f64 * SPEED_OF_SOUND_CM_PER_US / 2.0;
        Distance { cm: cm as u32 }
    }

    /// Distance in centimeters.
    pub const fn cm(&self) -> u32 {
        self.cm
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cm", self.cm)
    }
}

/// How a channel's current cycle ended, if it has.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Armed and waiting for a falling edge or the deadline.
    Pending,
    /// A falling edge closed the echo pulse.
    Echoed,
    /// The deadline fired first.
    TimedOut,
}

impl Resolution {
    fn from_raw(raw: u8) -> Self {
        match raw {
            ECHOED => Resolution::Echoed,
            TIMED_OUT => Resolution::TimedOut,
            _ => Resolution::Pending,
        }
    }
}

/// Timing state of one trigger/echo sensor pair.
///
/// Write access is partitioned:
/// - the edge handlers write `pulse_start` / `pulse_end`,
/// - the timeout handler writes the timed-out resolution,
/// - the controller only calls [`SensorChannel::arm`] and reads.
///
/// The first of {falling edge, timeout} to resolve a cycle wins. The loser is
/// ignored, so a deadline that fires after the echo completed leaves the echo
/// reading intact.
#[derive(Debug)]
pub struct SensorChannel {
    trigger_pin: u8,
    echo_pin: u8,
    pulse_start: AtomicU64,
    pulse_end: AtomicU64,
    status: AtomicU8,
}

impl SensorChannel {
    /// Construct an armed channel bound to the given pins.
    ///
    /// # Arguments
    ///
    /// * `trigger_pin`: Output pin that starts a measurement.
    /// * `echo_pin`: Input pin carrying the echo pulse.
    pub const fn new(trigger_pin: u8, echo_pin: u8) -> Self {
        SensorChannel {
            trigger_pin,
            echo_pin,
            pulse_start: AtomicU64::new(0),
            pulse_end: AtomicU64::new(0),
            status: AtomicU8::new(PENDING),
        }
    }

    /// Returns the trigger pin.
    pub const fn trigger_pin(&self) -> u8 {
        self.trigger_pin
    }

    /// Returns the echo pin.
    pub const fn echo_pin(&self) -> u8 {
        self.echo_pin
    }

    /// Reset both timestamps and the timeout flag for a new cycle.
    ///
    /// Must not be called while interrupts from the previous cycle may still
    /// be delivered. The reset is published with `Release` ordering; callers
    /// that arm timers or triggers afterwards should issue a fence first.
    pub fn arm(&self) {
        self.pulse_start.store(0, Ordering::Relaxed);
        self.pulse_end.store(0, Ordering::Relaxed);
        self.status.store(PENDING, Ordering::Release);
    }

    /// Record the start of the echo pulse.
    ///
    /// Ignored once the cycle is resolved.
    pub fn on_rising_edge(&self, timestamp_us: u64) {
        if self.status.load(Ordering::Acquire) == PENDING {
            self.pulse_start.store(timestamp_us, Ordering::Release);
        }
    }

    /// Record the end of the echo pulse and resolve the cycle.
    ///
    /// Returns `true` if this edge resolved the cycle, `false` if the
    /// deadline (or an earlier falling edge) got there first.
    pub fn on_falling_edge(&self, timestamp_us: u64) -> bool {
        if self.status.load(Ordering::Acquire) != PENDING {
            return false;
        }
        self.pulse_end.store(timestamp_us, Ordering::Relaxed);
        self.status
            .compare_exchange(PENDING, ECHOED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the cycle as timed out.
    ///
    /// Returns `true` if the deadline resolved the cycle. A deadline that
    /// arrives after the echo completed is a no-op and returns `false`.
    pub fn on_timeout(&self) -> bool {
        self.status
            .compare_exchange(PENDING, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Current resolution of the cycle.
    pub fn resolution(&self) -> Resolution {
        Resolution::from_raw(self.status.load(Ordering::Acquire))
    }

    /// `true` once an echo was captured or the deadline fired.
    pub fn is_resolved(&self) -> bool {
        self.resolution() != Resolution::Pending
    }

    /// `true` if the deadline resolved this cycle.
    pub fn timed_out(&self) -> bool {
        self.resolution() == Resolution::TimedOut
    }

    /// Rising edge timestamp, `0` if not captured this cycle.
    pub fn pulse_start(&self) -> u64 {
        self.pulse_start.load(Ordering::Acquire)
    }

    /// Falling edge timestamp, `0` if not captured this cycle.
    pub fn pulse_end(&self) -> u64 {
        self.pulse_end.load(Ordering::Acquire)
    }

    /// Convert the captured echo into a distance.
    ///
    /// # Errors
    ///
    /// Returns `Err(ChannelError::EchoTimeout)` if the deadline resolved the cycle.
    /// Returns `Err(ChannelError::Unresolved)` if the cycle is still pending.
    /// Returns `Err(ChannelError::MalformedReading)` if no rising edge was
    /// captured or the falling edge does not come after it.
    pub fn compute_distance_cm(&self) -> Result<Distance, ChannelError> {
        match self.resolution() {
            Resolution::TimedOut => return Err(ChannelError::EchoTimeout),
            Resolution::Pending => return Err(ChannelError::Unresolved),
            Resolution::Echoed => {}
        }

        let start_us = self.pulse_start();
        let end_us = self.pulse_end();
        if start_us == 0 || end_us <= start_us {
            return Err(ChannelError::MalformedReading { start_us, end_us });
        }
        Ok(Distance::from_echo_us(end_us - start_us))
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SensorChannel (trig: {}, echo: {}, {:?})",
            self.trigger_pin,
            self.echo_pin,
            self.resolution()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echoed(start: u64, end: u64) -> SensorChannel {
        let channel = SensorChannel::new(13, 12);
        channel.arm();
        channel.on_rising_edge(start);
        channel.on_falling_edge(end);
        channel
    }

    #[test]
    fn test_new_channel_is_pending() {
        let channel = SensorChannel::new(13, 12);
        assert_eq!(channel.trigger_pin(), 13);
        assert_eq!(channel.echo_pin(), 12);
        assert!(!channel.is_resolved());
        assert!(!channel.timed_out());
        assert_eq!(channel.compute_distance_cm(), Err(ChannelError::Unresolved));
    }

    #[test]
    fn test_500us_echo_is_8cm() {
        // 500 * 0.0343 / 2 = 8.575
        let channel = echoed(1000, 1500);
        assert!(channel.is_resolved());
        assert_eq!(channel.resolution(), Resolution::Echoed);
        assert_eq!(channel.compute_distance_cm(), Ok(Distance::from_cm(8)));
    }

    #[test]
    fn test_distance_conversion() {
        assert_eq!(Distance::from_echo_us(0).cm(), 0);
        assert_eq!(Distance::from_echo_us(58).cm(), 0); // 0.9947
        assert_eq!(Distance::from_echo_us(1000).cm(), 17); // 17.15
        assert_eq!(Distance::from_echo_us(23_324).cm(), 400); // 400.0066
        assert_eq!(Distance::from_echo_us(u64::MAX).cm(), u32::MAX);
    }

    #[test]
    fn test_distance_is_monotonic_in_echo_width() {
        let mut previous = 0;
        for elapsed in 1..40_000u64 {
            let cm = echoed(10_000, 10_000 + elapsed).compute_distance_cm().unwrap().cm();
            assert!(cm >= previous, "{} us gave {} cm after {} cm", elapsed, cm, previous);
            previous = cm;
        }
    }

    #[test]
    fn test_timeout_without_edges_fails() {
        let channel = SensorChannel::new(19, 18);
        channel.arm();
        assert!(channel.on_timeout());
        assert!(channel.is_resolved());
        assert!(channel.timed_out());
        assert_eq!(channel.compute_distance_cm(), Err(ChannelError::EchoTimeout));
    }

    #[test]
    fn test_timeout_overrides_stamped_rising_edge() {
        let channel = SensorChannel::new(19, 18);
        channel.arm();
        channel.on_rising_edge(2_000);
        assert!(channel.on_timeout());
        // Echo clipped by the deadline: the late falling edge loses.
        assert!(!channel.on_falling_edge(40_000));
        assert_eq!(channel.compute_distance_cm(), Err(ChannelError::EchoTimeout));
    }

    #[test]
    fn test_timeout_after_echo_is_noop() {
        let channel = echoed(1000, 1500);
        assert!(!channel.on_timeout());
        assert!(!channel.timed_out());
        assert_eq!(channel.compute_distance_cm(), Ok(Distance::from_cm(8)));
    }

    #[test]
    fn test_second_falling_edge_is_ignored() {
        let channel = echoed(1000, 1500);
        assert!(!channel.on_falling_edge(9_000));
        assert_eq!(channel.pulse_end(), 1500);
    }

    #[test]
    fn test_falling_before_rising_is_malformed() {
        let channel = SensorChannel::new(13, 12);
        channel.arm();
        assert!(channel.on_falling_edge(1000));
        channel.on_rising_edge(1500);
        assert_eq!(
            channel.compute_distance_cm(),
            Err(ChannelError::MalformedReading { start_us: 0, end_us: 1000 })
        );
    }

    #[test]
    fn test_inverted_stamps_are_malformed() {
        let channel = echoed(1500, 1000);
        assert_eq!(
            channel.compute_distance_cm(),
            Err(ChannelError::MalformedReading { start_us: 1500, end_us: 1000 })
        );
        let channel = echoed(1500, 1500);
        assert!(matches!(
            channel.compute_distance_cm(),
            Err(ChannelError::MalformedReading { .. })
        ));
    }

    #[test]
    fn test_consecutive_cycles_are_independent() {
        let channel = echoed(1000, 1500);
        assert_eq!(channel.compute_distance_cm(), Ok(Distance::from_cm(8)));

        channel.arm();
        assert_eq!(channel.pulse_start(), 0);
        assert_eq!(channel.pulse_end(), 0);
        assert!(!channel.is_resolved());

        channel.on_rising_edge(100_000);
        channel.on_falling_edge(101_000);
        assert_eq!(channel.compute_distance_cm(), Ok(Distance::from_cm(17)));

        channel.arm();
        assert!(channel.on_timeout());
        channel.arm();
        assert!(!channel.timed_out());
        assert_eq!(channel.compute_distance_cm(), Err(ChannelError::Unresolved));
    }

    #[test]
    fn test_concurrent_timeout_and_echo_resolve_once() {
        use std::sync::Arc;
        use std::thread;

        for round in 0..200u64 {
            let channel = Arc::new(SensorChannel::new(13, 12));
            channel.arm();
            channel.on_rising_edge(1000);

            let echo = {
                let channel = Arc::clone(&channel);
                thread::spawn(move || channel.on_falling_edge(1500 + round))
            };
            let deadline = {
                let channel = Arc::clone(&channel);
                thread::spawn(move || channel.on_timeout())
            };
            let echo_won = echo.join().unwrap();
            let deadline_won = deadline.join().unwrap();

            assert!(echo_won ^ deadline_won);
            match channel.resolution() {
                Resolution::Echoed => assert!(channel.compute_distance_cm().is_ok()),
                Resolution::TimedOut => {
                    assert_eq!(channel.compute_distance_cm(), Err(ChannelError::EchoTimeout))
                }
                Resolution::Pending => panic!("channel left pending"),
            }
        }
    }

    #[test]
    fn test_display() {
        let channel = echoed(1000, 1500);
        assert_eq!(format!("{}", channel), "SensorChannel (trig: 13, echo: 12, Echoed)");
        assert_eq!(format!("{}", Distance::from_cm(42)), "42 cm");
        assert_eq!(
            format!("{}", ChannelError::MalformedReading { start_us: 5, end_us: 3 }),
            "malformed reading: falling edge at 3 us, rising edge at 5 us"
        );
    }
}
