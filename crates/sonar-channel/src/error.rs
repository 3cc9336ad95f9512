//! Error types for a single sensor channel.
//!
//! Every variant describes why one channel produced no distance in one
//! measurement cycle. None of them is fatal: the next cycle re-arms the
//! channel and starts over.

use core::fmt;

/// Reasons a channel could not produce a distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// No falling edge was observed before the echo deadline expired.
    EchoTimeout,
    /// The captured edges do not describe a pulse.
    ///
    /// Returned when the falling edge is stamped at or before the rising
    /// edge, or when no rising edge was captured at all (`start_us == 0`).
    MalformedReading {
        /// Rising edge timestamp in microseconds, `0` if never captured.
        start_us: u64,
        /// Falling edge timestamp in microseconds.
        end_us: u64,
    },
    /// The channel has not been resolved yet in the current cycle.
    Unresolved,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::EchoTimeout => write!(f, "no echo before the deadline"),
            ChannelError::MalformedReading { start_us, end_us } => write!(
                f,
                "malformed reading: falling edge at {} us, rising edge at {} us",
                end_us, start_us
            ),
            ChannelError::Unresolved => write!(f, "channel not resolved yet"),
        }
    }
}

impl core::error::Error for ChannelError {}
