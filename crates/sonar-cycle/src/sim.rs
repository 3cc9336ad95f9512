//! Deterministic bench implementing every [`crate::hal`] capability on a
//! virtual microsecond clock.
//!
//! Time only moves when the code under test delays, relaxes or polls for
//! input. Edge and deadline callbacks scheduled inside that window run in
//! timestamp order, on the caller's thread, as interrupts would on a single
//! core. Simulated sensors answer a trigger pulse on its falling edge.
//!
//! All clones of a [`SimBench`] share one state, so a test can hand copies to
//! the controller, the reporter and the control loop and still inspect them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sonar_channel::SPEED_OF_SOUND_CM_PER_US;

use crate::hal::{
    CommandInput, DeadlineTimer, Delay, DigitalOutput, EdgeCallback, EdgeInterrupts,
    MonotonicClock, Relax, TimerCallback, WallClock, WallTime,
};

/// Virtual time at which the bench starts. Non-zero so that no edge is ever
/// stamped with the `0` "not captured" sentinel.
pub const BOOT_US: u64 = 1_000_000;

/// Virtual time that passes on each [`Relax::relax`] call.
pub const RELAX_STEP_US: u64 = 10;

/// How a simulated sensor answers a trigger pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// No echo at all.
    Silent,
    /// Echo rises `after_us` after the trigger falls and stays high `width_us`.
    Echo { after_us: u64, width_us: u64 },
    /// Only a falling edge arrives, as with a missed rising interrupt.
    FallingOnly { after_us: u64 },
}

impl Response {
    /// An echo whose width converts back to exactly `cm` centimeters.
    pub fn distance_cm(cm: u32) -> Self {
        let width = (cm as f64 * 2.0 / SPEED_OF_SOUND_CM_PER_US).ceil() as u64 + 1;
        Response::Echo { after_us: 450, width_us: width }
    }
}

/// A recorded digital output write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinWrite {
    pub at_us: u64,
    pub pin: u8,
    pub level: bool,
}

/// Handle of a simulated deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimTimer(u64);

#[derive(Debug, Clone, Copy)]
enum Event {
    Rising(u8),
    Falling(u8),
    Deadline(u64),
}

type SharedEdge = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct Inner {
    now_us: u64,
    seq: u64,
    // Keyed by (due, sequence) so equal timestamps keep scheduling order.
    queue: BTreeMap<(u64, u64), Event>,
    edges: HashMap<u8, (SharedEdge, SharedEdge)>,
    timers: HashMap<u64, TimerCallback>,
    next_timer: u64,
    drop_timers: bool,
    timer_lag_us: u64,
    fired: usize,
    cancelled: usize,
    levels: HashMap<u8, bool>,
    writes: Vec<PinWrite>,
    responders: HashMap<u8, (u8, Response)>,
    keys: VecDeque<char>,
    wall_start: WallTime,
}

impl Inner {
    fn schedule(&mut self, due_us: u64, event: Event) {
        self.seq += 1;
        self.queue.insert((due_us, self.seq), event);
    }
}

enum Due {
    Edge(SharedEdge, u64),
    Deadline(TimerCallback),
    Nothing,
}

/// Shared handle to the simulated bench.
#[derive(Clone)]
pub struct SimBench {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SimBench {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBench {
    pub fn new() -> Self {
        let inner = Inner {
            now_us: BOOT_US,
            wall_start: WallTime { hour: 11, minute: 50, second: 0 },
            ..Inner::default()
        };
        SimBench { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Make the sensor on `trigger_pin` answer with `response`, on `echo_pin`.
    pub fn respond(&self, trigger_pin: u8, echo_pin: u8, response: Response) {
        self.inner.lock().responders.insert(trigger_pin, (echo_pin, response));
    }

    /// Swallow armed deadlines so they never fire.
    pub fn drop_timers(&self, drop: bool) {
        self.inner.lock().drop_timers = drop;
    }

    /// Make deadlines armed from now on fire `lag` later than asked.
    pub fn lag_timers(&self, lag: Duration) {
        self.inner.lock().timer_lag_us = lag.as_micros() as u64;
    }

    /// Queue keys for [`CommandInput::poll`].
    pub fn type_keys(&self, keys: &str) {
        self.inner.lock().keys.extend(keys.chars());
    }

    /// Current virtual time in µs.
    pub fn virtual_us(&self) -> u64 {
        self.inner.lock().now_us
    }

    pub fn pin_writes(&self) -> Vec<PinWrite> {
        self.inner.lock().writes.clone()
    }

    /// Number of trigger pulses sent on `pin`.
    pub fn triggers(&self, pin: u8) -> usize {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|w| w.pin == pin && !w.level)
            .count()
    }

    pub fn timers_fired(&self) -> usize {
        self.inner.lock().fired
    }

    pub fn timers_cancelled(&self) -> usize {
        self.inner.lock().cancelled
    }

    /// Move the clock to `target_us`, running every event due on the way.
    pub fn advance_to(&self, target_us: u64) {
        loop {
            // Callbacks run without the lock held.
            match self.pop_due(target_us) {
                Due::Edge(callback, at) => callback(at),
                Due::Deadline(callback) => callback(),
                Due::Nothing => break,
            }
        }
        let mut inner = self.inner.lock();
        inner.now_us = inner.now_us.max(target_us);
    }

    fn advance_by(&self, duration: Duration) {
        let target = self.virtual_us() + duration.as_micros() as u64;
        self.advance_to(target);
    }

    fn pop_due(&self, target_us: u64) -> Due {
        let mut inner = self.inner.lock();
        loop {
            let Some((&(due, seq), _)) = inner.queue.first_key_value() else {
                return Due::Nothing;
            };
            if due > target_us {
                return Due::Nothing;
            }
            let Some(event) = inner.queue.remove(&(due, seq)) else {
                return Due::Nothing;
            };
            inner.now_us = inner.now_us.max(due);
            match event {
                Event::Rising(pin) | Event::Falling(pin) => {
                    let Some((on_rising, on_falling)) = inner.edges.get(&pin) else {
                        continue;
                    };
                    let callback = match event {
                        Event::Rising(_) => on_rising.clone(),
                        _ => on_falling.clone(),
                    };
                    return Due::Edge(callback, due);
                }
                Event::Deadline(id) => {
                    // Cancelled deadlines have no callback left.
                    if let Some(callback) = inner.timers.remove(&id) {
                        inner.fired += 1;
                        return Due::Deadline(callback);
                    }
                }
            }
        }
    }
}

impl MonotonicClock for SimBench {
    fn now_us(&self) -> u64 {
        self.virtual_us()
    }
}

impl DigitalOutput for SimBench {
    fn set(&mut self, pin: u8, level: bool) {
        let mut inner = self.inner.lock();
        let now = inner.now_us;
        let was_high = inner.levels.insert(pin, level).unwrap_or(false);
        inner.writes.push(PinWrite { at_us: now, pin, level });

        if !(was_high && !level) {
            return;
        }
        let Some(&(echo_pin, response)) = inner.responders.get(&pin) else {
            return;
        };
        match response {
            Response::Silent => {}
            Response::Echo { after_us, width_us } => {
                inner.schedule(now + after_us, Event::Rising(echo_pin));
                inner.schedule(now + after_us + width_us, Event::Falling(echo_pin));
            }
            Response::FallingOnly { after_us } => {
                inner.schedule(now + after_us, Event::Falling(echo_pin));
            }
        }
    }
}

impl EdgeInterrupts for SimBench {
    fn subscribe(&mut self, pin: u8, on_rising: EdgeCallback, on_falling: EdgeCallback) {
        self.inner
            .lock()
            .edges
            .insert(pin, (Arc::from(on_rising), Arc::from(on_falling)));
    }
}

impl DeadlineTimer for SimBench {
    type Handle = SimTimer;

    fn arm_once(&mut self, duration: Duration, callback: TimerCallback) -> SimTimer {
        let mut inner = self.inner.lock();
        inner.next_timer += 1;
        let id = inner.next_timer;
        if !inner.drop_timers {
            let due = inner.now_us + duration.as_micros() as u64 + inner.timer_lag_us;
            inner.timers.insert(id, callback);
            inner.schedule(due, Event::Deadline(id));
        }
        SimTimer(id)
    }

    fn cancel(&mut self, handle: &SimTimer) {
        let mut inner = self.inner.lock();
        if inner.timers.remove(&handle.0).is_some() {
            inner.cancelled += 1;
        }
    }
}

impl Delay for SimBench {
    fn delay(&mut self, duration: Duration) {
        self.advance_by(duration);
    }
}

impl Relax for SimBench {
    fn relax(&mut self) {
        self.advance_by(Duration::from_micros(RELAX_STEP_US));
    }
}

impl WallClock for SimBench {
    fn now(&self) -> WallTime {
        let inner = self.inner.lock();
        let seconds = (inner.now_us - BOOT_US) / 1_000_000;
        inner.wall_start.plus_seconds(seconds)
    }
}

impl CommandInput for SimBench {
    fn poll(&mut self, timeout: Duration) -> Option<char> {
        let key = self.inner.lock().keys.pop_front();
        if key.is_none() {
            self.advance_by(timeout);
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_events_run_in_timestamp_order() {
        let bench = SimBench::new();
        let mut handle = bench.clone();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        let second = Arc::clone(&order);
        handle.arm_once(Duration::from_millis(2), Box::new(move || first.lock().push(2)));
        handle.arm_once(Duration::from_millis(1), Box::new(move || second.lock().push(1)));
        handle.delay(Duration::from_millis(5));

        assert_eq!(*order.lock(), [1, 2]);
        assert_eq!(bench.timers_fired(), 2);
        assert_eq!(bench.virtual_us(), BOOT_US + 5_000);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let bench = SimBench::new();
        let mut handle = bench.clone();
        let timer = handle.arm_once(Duration::from_millis(1), Box::new(|| {}));
        handle.cancel(&timer);
        handle.cancel(&timer);
        handle.delay(Duration::from_millis(2));
        handle.cancel(&timer);
        assert_eq!(bench.timers_cancelled(), 1);
        assert_eq!(bench.timers_fired(), 0);
    }

    #[test]
    fn test_lagged_deadline_fires_late() {
        let bench = SimBench::new();
        let mut handle = bench.clone();
        bench.lag_timers(Duration::from_millis(4));
        handle.arm_once(Duration::from_millis(1), Box::new(|| {}));
        handle.delay(Duration::from_millis(4));
        assert_eq!(bench.timers_fired(), 0);
        handle.delay(Duration::from_millis(1));
        assert_eq!(bench.timers_fired(), 1);
    }

    #[test]
    fn test_trigger_falling_edge_schedules_echo() {
        let bench = SimBench::new();
        let mut handle = bench.clone();
        let start = Arc::new(AtomicU64::new(0));
        let end = Arc::new(AtomicU64::new(0));
        let (s, e) = (Arc::clone(&start), Arc::clone(&end));
        handle.subscribe(
            12,
            Box::new(move |ts| s.store(ts, Ordering::SeqCst)),
            Box::new(move |ts| e.store(ts, Ordering::SeqCst)),
        );
        bench.respond(13, 12, Response::Echo { after_us: 100, width_us: 500 });

        handle.set(13, true);
        handle.delay(Duration::from_micros(10));
        handle.set(13, false);
        handle.delay(Duration::from_millis(1));

        let fall = BOOT_US + 10;
        assert_eq!(start.load(Ordering::SeqCst), fall + 100);
        assert_eq!(end.load(Ordering::SeqCst), fall + 600);
        assert_eq!(bench.triggers(13), 1);
    }

    #[test]
    fn test_wall_clock_follows_virtual_time() {
        let bench = SimBench::new();
        let mut handle = bench.clone();
        handle.delay(Duration::from_millis(61_500));
        assert_eq!(WallClock::now(&bench), WallTime::new(11, 51, 1).unwrap());
    }

    #[test]
    fn test_poll_waits_out_timeout_when_idle() {
        let bench = SimBench::new();
        let mut handle = bench.clone();
        bench.type_keys("s");
        assert_eq!(handle.poll(Duration::from_millis(100)), Some('s'));
        assert_eq!(bench.virtual_us(), BOOT_US);
        assert_eq!(handle.poll(Duration::from_millis(100)), None);
        assert_eq!(bench.virtual_us(), BOOT_US + 100_000);
    }
}
