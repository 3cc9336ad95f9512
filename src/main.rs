mod config;   // brings `config.rs` in as `crate::config`
mod console;  // brings `console.rs` in as `crate::console`
mod host;     // brings `host.rs` in as `crate::host`

use console::ConsoleKeys;
use host::{HostBoard, RtcClock};

use anyhow::{Context, anyhow};
use sonar_cycle::{ControlLoop, CycleController, Reporter, Sensor, Settings};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::runtime::{Handle, Runtime};
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    info!("Sonar ranger starting. Setting up Tokio runtime and control thread...");

    let settings = config::load_settings().context("loading configuration")?;
    let runtime = Runtime::new().context("starting tokio runtime")?;
    let shutdown = Arc::new(AtomicBool::new(false));

    runtime.spawn({
        let shutdown = Arc::clone(&shutdown);
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, stopping after the current iteration.");
                    shutdown.store(true, Ordering::Relaxed);
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    info!("Spawning control thread...");
    let control = std::thread::Builder::new()
        .name("control".into())
        .spawn({
            let handle = runtime.handle().clone();
            let shutdown = Arc::clone(&shutdown);
            move || run(settings, handle, &shutdown)
        })
        .context("spawning control thread")?;

    let result = control
        .join()
        .map_err(|_| anyhow!("control thread panicked"))?;

    // The stdin reader may be parked in a blocking read; don't wait for it.
    runtime.shutdown_background();
    result
}

fn run(settings: Settings, runtime: Handle, shutdown: &AtomicBool) -> anyhow::Result<()> {
    info!("Control thread started.");
    let mut board = HostBoard::new(runtime.clone(), &settings.sensors);
    let [first, second] = &settings.sensors;
    let sensors = [
        Sensor::attach(1, first.trigger_pin, first.echo_pin, &mut board),
        Sensor::attach(2, second.trigger_pin, second.echo_pin, &mut board),
    ];

    let reporter = Reporter::new(RtcClock::new(settings.clock.start), std::io::stdout());
    let controller = CycleController::new(board, sensors, reporter, settings.timing.clone());
    let mut control = ControlLoop::new(ConsoleKeys::spawn(runtime), controller);

    control.run(shutdown);
    info!(cycles = control.cycles(), "Control thread finished.");
    Ok(())
}
