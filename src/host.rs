use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sonar_channel::SPEED_OF_SOUND_CM_PER_US;
use sonar_cycle::hal::{
    DeadlineTimer, Delay, DigitalOutput, EdgeCallback, EdgeInterrupts, MonotonicClock, Relax,
    TimerCallback, WallClock, WallTime,
};
use sonar_cycle::settings::SensorSettings;
use spin_sleep::SpinSleeper;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Delay between the end of the trigger pulse and the start of the echo.
const ECHO_LATENCY: Duration = Duration::from_micros(450);

type EdgePair = (Arc<dyn Fn(u64) + Send + Sync>, Arc<dyn Fn(u64) + Send + Sync>);

/// Echo input lines. Edges are delivered from the simulated sensor threads,
/// which play the role of the GPIO interrupt.
#[derive(Clone, Default)]
struct EchoLines {
    handlers: Arc<Mutex<HashMap<u8, EdgePair>>>,
}

impl EchoLines {
    fn edge(&self, pin: u8, rising: bool, timestamp_us: u64) {
        let handler = self.handlers.lock().get(&pin).map(|(on_rising, on_falling)| {
            if rising { Arc::clone(on_rising) } else { Arc::clone(on_falling) }
        });
        match handler {
            Some(handler) => handler(timestamp_us),
            None => trace!(pin, rising, "Edge on unsubscribed pin"),
        }
    }
}

/// A simulated sensor bound to a trigger pin.
#[derive(Debug, Clone, Copy)]
struct Sonar {
    echo_pin: u8,
    distance_cm: Option<u32>,
}

impl Sonar {
    fn echo_width(&self) -> Option<Duration> {
        let cm = self.distance_cm?;
        let us = (cm as f64 * 2.0 / SPEED_OF_SOUND_CM_PER_US).ceil() as u64 + 1;
        Some(Duration::from_micros(us))
    }
}

/// Monotonic microseconds since `epoch`. Starts at 1 so no edge is ever
/// stamped with the "not captured" sentinel.
fn micros_since(epoch: Instant) -> u64 {
    epoch.elapsed().as_micros() as u64 + 1
}

/// Real-time board for running the ranger on a host machine.
///
/// Deadlines run on the tokio runtime; delays and simulated echoes use
/// [`SpinSleeper`] for microsecond accuracy.
pub struct HostBoard {
    epoch: Instant,
    runtime: Handle,
    sleeper: SpinSleeper,
    lines: EchoLines,
    sonars: HashMap<u8, Sonar>,
    levels: HashMap<u8, bool>,
}

impl HostBoard {
    pub fn new(runtime: Handle, sensors: &[SensorSettings]) -> Self {
        let sonars = sensors
            .iter()
            .map(|s| {
                let sonar = Sonar { echo_pin: s.echo_pin, distance_cm: s.simulated_cm };
                (s.trigger_pin, sonar)
            })
            .collect();

        HostBoard {
            epoch: Instant::now(),
            runtime,
            sleeper: SpinSleeper::new(10_000),
            lines: EchoLines::default(),
            sonars,
            levels: HashMap::new(),
        }
    }

    fn answer_trigger(&self, trigger_pin: u8) {
        let Some(sonar) = self.sonars.get(&trigger_pin).copied() else {
            return;
        };
        let Some(width) = sonar.echo_width() else {
            trace!(trigger_pin, "Simulated sensor stays silent");
            return;
        };

        let lines = self.lines.clone();
        let epoch = self.epoch;
        let sleeper = self.sleeper;
        let spawned = std::thread::Builder::new()
            .name(format!("sonar-{}", trigger_pin))
            .spawn(move || {
                sleeper.sleep(ECHO_LATENCY);
                lines.edge(sonar.echo_pin, true, micros_since(epoch));
                sleeper.sleep(width);
                lines.edge(sonar.echo_pin, false, micros_since(epoch));
            });
        if let Err(e) = spawned {
            warn!(trigger_pin, error = %e, "Failed to start simulated echo");
        }
    }
}

impl MonotonicClock for HostBoard {
    fn now_us(&self) -> u64 {
        micros_since(self.epoch)
    }
}

impl DigitalOutput for HostBoard {
    fn set(&mut self, pin: u8, level: bool) {
        let was_high = self.levels.insert(pin, level).unwrap_or(false);
        if was_high && !level {
            self.answer_trigger(pin);
        }
    }
}

impl EdgeInterrupts for HostBoard {
    fn subscribe(&mut self, pin: u8, on_rising: EdgeCallback, on_falling: EdgeCallback) {
        debug!(pin, "Echo pin subscribed");
        self.lines
            .handlers
            .lock()
            .insert(pin, (Arc::from(on_rising), Arc::from(on_falling)));
    }
}

impl DeadlineTimer for HostBoard {
    type Handle = JoinHandle<()>;

    fn arm_once(&mut self, duration: Duration, callback: TimerCallback) -> JoinHandle<()> {
        self.runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            callback();
        })
    }

    fn cancel(&mut self, handle: &JoinHandle<()>) {
        handle.abort();
    }
}

impl Delay for HostBoard {
    fn delay(&mut self, duration: Duration) {
        self.sleeper.sleep(duration);
    }
}

impl Relax for HostBoard {
    fn relax(&mut self) {
        std::thread::yield_now();
    }
}

/// Time of day seeded from configuration, advanced by the host clock.
#[derive(Debug, Clone, Copy)]
pub struct RtcClock {
    start: WallTime,
    epoch: Instant,
}

impl RtcClock {
    pub fn new(start: WallTime) -> Self {
        RtcClock { start, epoch: Instant::now() }
    }
}

impl WallClock for RtcClock {
    fn now(&self) -> WallTime {
        self.start.plus_seconds(self.epoch.elapsed().as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn sensors() -> Vec<SensorSettings> {
        vec![
            SensorSettings { trigger_pin: 13, echo_pin: 12, simulated_cm: Some(50) },
            SensorSettings { trigger_pin: 19, echo_pin: 18, simulated_cm: None },
        ]
    }

    #[test]
    fn test_echo_width_round_trips() {
        let sonar = Sonar { echo_pin: 12, distance_cm: Some(50) };
        let width = sonar.echo_width().unwrap();
        let cm = sonar_channel::Distance::from_echo_us(width.as_micros() as u64).cm();
        assert_eq!(cm, 50);
        assert!(Sonar { echo_pin: 12, distance_cm: None }.echo_width().is_none());
    }

    #[test]
    fn test_monotonic_clock_never_zero() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let board = HostBoard::new(runtime.handle().clone(), &sensors());
        let a = board.now_us();
        let b = board.now_us();
        assert!(a >= 1);
        assert!(b >= a);
    }

    #[test]
    fn test_trigger_produces_echo_edges() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut board = HostBoard::new(runtime.handle().clone(), &sensors());
        let start = Arc::new(AtomicU64::new(0));
        let end = Arc::new(AtomicU64::new(0));
        let (s, e) = (Arc::clone(&start), Arc::clone(&end));
        board.subscribe(
            12,
            Box::new(move |ts| s.store(ts, Ordering::SeqCst)),
            Box::new(move |ts| e.store(ts, Ordering::SeqCst)),
        );

        board.set(13, true);
        board.delay(Duration::from_micros(10));
        board.set(13, false);

        let deadline = Instant::now() + Duration::from_secs(2);
        while end.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        let width = end.load(Ordering::SeqCst) - start.load(Ordering::SeqCst);
        // 50 cm is ~2.9 ms of echo; allow scheduler slack on loaded machines.
        assert!(width >= 2_900, "echo width {} us", width);
    }

    #[test]
    fn test_cancelled_deadline_does_not_fire() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut board = HostBoard::new(runtime.handle().clone(), &sensors());
        let fired = Arc::new(AtomicU64::new(0));

        let f = Arc::clone(&fired);
        let handle = board.arm_once(
            Duration::from_millis(20),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        board.cancel(&handle);
        board.cancel(&handle);

        let f = Arc::clone(&fired);
        let kept = board.arm_once(
            Duration::from_millis(5),
            Box::new(move || {
                f.fetch_add(10, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(60));
        board.cancel(&kept);
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_rtc_clock_starts_at_seed() {
        let start = WallTime::new(11, 50, 0).unwrap();
        let clock = RtcClock::new(start);
        let now = clock.now();
        assert!(now == start || now == start.plus_seconds(1));
    }
}
