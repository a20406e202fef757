//! Failures that keep `stafd` from coming up or going down cleanly.
//!
//! Each variant names the launch stage that failed. Lower-level errors are
//! wrapped rather than flattened so their own messages stay intact.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use nix::errno::Errno;
use thiserror::Error;

use ortho_config::OrthoError;

use stafd_config::{RuntimePathsError, SocketPreparationError};

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

use super::daemonizer::DaemonizeError;
use super::files::RuntimeFile;
use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[from]
        source: Arc<OrthoError>,
    },
    /// The directory for the `local` interface socket could not be prepared.
    #[error("failed to prepare the local interface socket: {source}")]
    LocalSocket {
        /// Underlying filesystem error.
        #[from]
        source: SocketPreparationError,
    },
    /// No runtime directory could be derived or created beside the socket.
    #[error("failed to prepare the runtime directory: {source}")]
    RuntimeDirectory {
        /// Underlying path error.
        #[from]
        source: RuntimePathsError,
    },
    /// Another live `stafd` holds the lock for this socket.
    #[error("stafd is already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded by the running daemon.
        pid: u32,
    },
    /// A lock, PID or health file could not be created, written or removed.
    #[error("failed to {action} {file} file '{path}': {source}")]
    RuntimeFile {
        /// Which runtime file was involved.
        file: RuntimeFile,
        /// What was being done to it.
        action: &'static str,
        /// Path of the file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The health snapshot could not be encoded.
    #[error("failed to encode health snapshot: {source}")]
    HealthSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// The PID left by a previous daemon could not be checked.
    #[error("failed to check pid {pid} from a previous daemon: {source}")]
    CheckProcess {
        /// PID read from the stale PID file.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Health was reported before the PID file existed.
    #[error("pid must be written before updating health state")]
    MissingPid,
    /// Detaching from the terminal failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[from]
        source: DaemonizeError,
    },
    /// Neither a signal nor a `SHUTDOWN` request could be awaited.
    #[error("failed to await shutdown: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[from]
        source: ShutdownError,
    },
    /// The router could not be assembled from the configuration.
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[from]
        source: BootstrapError,
    },
    /// An interface could not start listening.
    #[error("failed to start interfaces: {source}")]
    Serve {
        /// Listener error from the first interface that failed.
        #[source]
        source: ListenerError,
    },
    /// An interface's accept loop ended abnormally while stopping.
    #[error("interfaces did not stop cleanly: {source}")]
    Stop {
        /// Listener error reported while joining the accept loops.
        #[source]
        source: ListenerError,
    },
}
