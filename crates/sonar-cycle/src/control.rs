use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::controller::{CycleController, CycleReport};
use crate::hal::{Board, CommandInput, WallClock};

pub const PROMPT: &str = "Type 's' to start or 'p' to stop measurements:";
pub const STARTING: &str = "Starting measurements...";
pub const STOPPING: &str = "Stopping measurements...";

/// Whether measurement cycles are being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
}

/// Operator command decoded from a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    /// `s` starts and `p` stops, in either case. Other keys mean nothing.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            's' => Some(Command::Start),
            'p' => Some(Command::Stop),
            _ => None,
        }
    }
}

impl RunState {
    pub fn apply(self, command: Command) -> Self {
        match command {
            Command::Start => RunState::Running,
            Command::Stop => RunState::Stopped,
        }
    }
}

/// Polls for start/stop keys and runs one cycle per iteration while running.
pub struct ControlLoop<I, B, W, O> {
    input: I,
    controller: CycleController<B, W, O>,
    state: RunState,
    poll_timeout: Duration,
    cycles: u64,
}

impl<I, B, W, O> ControlLoop<I, B, W, O>
where
    I: CommandInput,
    B: Board,
    W: WallClock,
    O: Write,
{
    pub fn new(input: I, controller: CycleController<B, W, O>) -> Self {
        let poll_timeout = controller.timing().poll_timeout();
        ControlLoop {
            input,
            controller,
            state: RunState::Stopped,
            poll_timeout,
            cycles: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Cycles run since construction.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn controller(&self) -> &CycleController<B, W, O> {
        &self.controller
    }

    /// Print the operator prompt.
    pub fn prompt(&mut self) {
        self.notice(PROMPT);
    }

    /// One iteration: wait briefly for a key, apply it, then run a cycle if
    /// measurements are enabled.
    pub fn step(&mut self) -> Option<CycleReport> {
        if let Some(key) = self.input.poll(self.poll_timeout) {
            match Command::from_key(key) {
                Some(command) => self.handle(command),
                None => debug!(?key, "Ignoring key"),
            }
        }

        if self.state != RunState::Running {
            return None;
        }
        self.cycles += 1;
        Some(self.controller.run_cycle())
    }

    /// Run until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(poll_timeout = ?self.poll_timeout, "Control loop started");
        self.prompt();
        while !shutdown.load(Ordering::Relaxed) {
            self.step();
        }
        info!(cycles = self.cycles, "Control loop stopped");
    }

    fn handle(&mut self, command: Command) {
        let previous = self.state;
        self.state = previous.apply(command);
        info!(?command, ?previous, state = ?self.state, "Command received");
        match command {
            Command::Start => self.notice(STARTING),
            Command::Stop => self.notice(STOPPING),
        }
    }

    fn notice(&mut self, message: &str) {
        if let Err(e) = self.controller.reporter_mut().notice(message) {
            warn!(error = %e, "Failed to write console notice");
        }
    }
}
