//! Detaches `stafd` from its controlling terminal.
//!
//! Once detached, anything the daemon writes to stdout or stderr (panic
//! messages included) lands in `stafd.out` in the runtime directory.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;

use daemonize_me::Daemon;
use thiserror::Error;
use tracing::info;

use stafd_config::RuntimePaths;

use super::PROCESS_TARGET;

const OUTPUT_FILE: &str = "stafd.out";

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background.
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError>;
}

/// Errors surfaced while detaching.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The output file for the detached process could not be opened.
    #[error("failed to open daemon output '{path}': {source}")]
    Output {
        /// Output file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Forking or detaching failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
}

/// Daemoniser backed by `daemonize-me`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        let output_path = paths.runtime_dir().join(OUTPUT_FILE);
        let (stdout, stderr) = open_output(&output_path).map_err(|source| {
            DaemonizeError::Output {
                path: output_path.clone(),
                source,
            }
        })?;
        info!(
            target: PROCESS_TARGET,
            runtime = %paths.runtime_dir().display(),
            output = %output_path.display(),
            "detaching from terminal"
        );
        Daemon::new()
            .work_dir(paths.runtime_dir())
            .umask(0o027)
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .stdout(stdout)
            .stderr(stderr)
            .start()?;
        info!(target: PROCESS_TARGET, pid = std::process::id(), "detached");
        Ok(())
    }
}

fn open_output(path: &std::path::Path) -> io::Result<(File, File)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let duplicate = file.try_clone()?;
    Ok((file, duplicate))
}
