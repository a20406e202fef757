use std::io;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// One-shot flag raised when the daemon should stop.
///
/// Handlers raise it in-process (the `SHUTDOWN` service and the dispatch
/// shutdown flag); signal listeners raise it from outside.
#[derive(Debug, Default)]
pub(crate) struct ShutdownLatch {
    triggered: Mutex<bool>,
    changed: Condvar,
}

impl ShutdownLatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn trigger(&self) {
        *self.triggered.lock() = true;
        self.changed.notify_all();
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.triggered.lock()
    }

    /// Blocks until [`Self::trigger`] has been called.
    pub(crate) fn wait(&self) {
        let mut triggered = self.triggered.lock();
        while !*triggered {
            self.changed.wait(&mut triggered);
        }
    }

    /// Blocks for at most `timeout`; returns whether the latch is raised.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let mut triggered = self.triggered.lock();
        if !*triggered {
            self.changed.wait_for(&mut triggered, timeout);
        }
        *triggered
    }
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until a signal arrives or `latch` is raised in-process.
    fn wait(&self, latch: &ShutdownLatch) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals.
#[derive(Debug, Clone)]
pub struct SystemShutdownSignal {
    timeout: Duration,
}

impl SystemShutdownSignal {
    /// Builds a signal listener with the configured timeout budget.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self, latch: &ShutdownLatch) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        thread::scope(|scope| {
            scope.spawn(|| {
                if let Some(signal) = signals.forever().next() {
                    info!(
                        target: PROCESS_TARGET,
                        signal,
                        timeout_ms = self.timeout.as_millis(),
                        "shutdown signal received"
                    );
                    latch.trigger();
                }
            });
            latch.wait();
            handle.close();
        });
        Ok(())
    }
}
