//! Built-in values used when no configuration layer supplies a setting.

#[cfg(unix)]
use camino::Utf8PathBuf;
#[cfg(unix)]
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::logging::{LogFormat, TracePoint};
use crate::socket::SocketEndpoint;

/// Port the default network interface listens on.
pub const DEFAULT_TCP_PORT: u16 = 6500;

/// Name of the default network interface.
pub const DEFAULT_INTERFACE: &str = "tcp";

/// Connection attempts per interface before giving up on it.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 2;

/// Upper bound of the randomised pause between connection attempts.
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 1000;

/// Trust granted to machines and users without a matching rule.
pub const DEFAULT_TRUST_LEVEL: u32 = 3;

/// Concurrent connections serviced by the worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 64;

/// Longest payload accepted from a peer: 256 MiB.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory grouping runtime artefacts under the platform runtime dir.
pub(crate) const RUNTIME_NAMESPACE: &str = "staf";

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the daemon.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Trace points logged unless the operator chooses otherwise.
pub(crate) fn default_trace_points() -> Vec<String> {
    [
        TracePoint::ServiceResults,
        TracePoint::ServiceErrors,
        TracePoint::AccessDenied,
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

pub(crate) fn default_interfaces() -> Vec<String> {
    vec![format!(
        "{DEFAULT_INTERFACE}=tcp://0.0.0.0:{DEFAULT_TCP_PORT}"
    )]
}

/// Processes of this machine are fully trusted.
pub(crate) fn default_machine_trust() -> Vec<String> {
    vec![format!("local://local={}", crate::MAX_TRUST_LEVEL)]
}

pub(crate) fn default_codepage() -> String {
    "UTF-8".to_owned()
}

pub(crate) fn default_text_eol() -> String {
    "native".to_owned()
}

/// Computes the default endpoint of the reserved `local` interface.
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push(RUNTIME_NAMESPACE);
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join("stafd.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
pub(crate) fn user_namespace() -> String {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT + 1)
}
