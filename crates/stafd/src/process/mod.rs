//! Daemon lifecycle: lock acquisition, daemonisation, health files, and
//! the shutdown wait.

use std::time::Duration;

pub(crate) mod daemonizer;
mod errors;
mod files;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::LaunchError;
pub use files::RuntimeFile;
pub use launch::{LaunchMode, run_daemon};
pub(crate) use shutdown::ShutdownLatch;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const FOREGROUND_ENV_VAR: &str = "STAFD_FOREGROUND";

#[cfg(test)]
pub(crate) mod test_support {
    pub use super::guard::test_support::{clear_health_events, health_events};
}
