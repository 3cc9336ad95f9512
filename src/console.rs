use std::time::Duration;

use sonar_cycle::hal::CommandInput;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Operator keys read from stdin on the tokio runtime.
///
/// Stdin is line-buffered, so keys arrive once the operator presses enter.
pub struct ConsoleKeys {
    runtime: Handle,
    rx: mpsc::Receiver<char>,
    closed: bool,
}

impl ConsoleKeys {
    /// Start the stdin reader task.
    pub fn spawn(runtime: Handle) -> Self {
        let (tx, rx) = mpsc::channel(32);
        runtime.spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        for key in line.chars() {
                            if tx.send(key).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Stdin closed, keys no longer accepted");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        return;
                    }
                }
            }
        });
        Self::from_receiver(runtime, rx)
    }

    fn from_receiver(runtime: Handle, rx: mpsc::Receiver<char>) -> Self {
        ConsoleKeys { runtime, rx, closed: false }
    }
}

impl CommandInput for ConsoleKeys {
    fn poll(&mut self, timeout: Duration) -> Option<char> {
        if self.closed {
            std::thread::sleep(timeout);
            return None;
        }
        let rx = &mut self.rx;
        match self.runtime.block_on(async { tokio::time::timeout(timeout, rx.recv()).await }) {
            Ok(Some(key)) => Some(key),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(_) => None,
        }
    }
}
