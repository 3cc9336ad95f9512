use std::sync::Arc;
use std::time::Duration;

use sonar_channel::{ChannelError, Distance, SensorChannel};
use tracing::{debug, trace};

use crate::hal::{Delay, DigitalOutput, EdgeInterrupts, TimerCallback};

/// One physical sensor: a numbered [`SensorChannel`] wired to the platform.
#[derive(Debug, Clone)]
pub struct Sensor {
    id: u8,
    channel: Arc<SensorChannel>,
}

impl Sensor {
    /// Create the channel for sensor `id` and route its echo edges into it.
    pub fn attach<E>(id: u8, trigger_pin: u8, echo_pin: u8, edges: &mut E) -> Self
    where
        E: EdgeInterrupts + ?Sized,
    {
        let channel = Arc::new(SensorChannel::new(trigger_pin, echo_pin));

        let rising = Arc::clone(&channel);
        let falling = Arc::clone(&channel);
        edges.subscribe(
            echo_pin,
            Box::new(move |ts| rising.on_rising_edge(ts)),
            Box::new(move |ts| {
                falling.on_falling_edge(ts);
            }),
        );
        debug!(sensor = id, trigger_pin, echo_pin, "Sensor attached");

        Sensor { id, channel }
    }

    /// Sensor number as printed in reports (1-based).
    pub fn id(&self) -> u8 {
        self.id
    }

    /// The shared timing state.
    pub fn channel(&self) -> &Arc<SensorChannel> {
        &self.channel
    }

    /// Deadline handler that resolves this channel as timed out.
    pub fn timeout_callback(&self) -> TimerCallback {
        let channel = Arc::clone(&self.channel);
        let id = self.id;
        Box::new(move || {
            if channel.on_timeout() {
                trace!(sensor = id, "Echo deadline expired");
            }
        })
    }

    /// Send the trigger pulse: high, hold, low.
    pub fn trigger<B>(&self, board: &mut B, hold: Duration)
    where
        B: DigitalOutput + Delay + ?Sized,
    {
        let pin = self.channel.trigger_pin();
        board.set(pin, true);
        board.delay(hold);
        board.set(pin, false);
    }

    /// Distance captured in the current cycle.
    pub fn reading(&self) -> Result<Distance, ChannelError> {
        self.channel.compute_distance_cm()
    }
}
