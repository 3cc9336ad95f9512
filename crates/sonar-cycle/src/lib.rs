//! Measurement cycle for a pair of ultrasonic sensors.
//!
//! [`controller::CycleController`] arms both [`sonar_channel::SensorChannel`]s,
//! fires their triggers, waits for every channel to resolve and reports the
//! result. [`control::ControlLoop`] gates cycles on operator start/stop keys.
//! Hardware is reached only through the traits in [`hal`].

pub mod control;
pub mod controller;
pub mod hal;
pub mod reporter;
pub mod sensor;
pub mod settings;
pub mod sim;

pub use control::{Command, ControlLoop, RunState};
pub use controller::{CycleController, CycleReport};
pub use reporter::{Reporter, SensorReading};
pub use sensor::Sensor;
pub use settings::{Settings, Timing};

pub use sonar_channel::{ChannelError, Distance, Resolution, SensorChannel};
