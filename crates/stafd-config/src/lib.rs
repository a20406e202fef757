//! Shared configuration model for the automation daemon.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then a TOML
//! file (`--config-path` or `STAFD_CONFIG_PATH`), then `STAFD_*` environment
//! variables, then command-line flags. The resulting [`Config`] describes the
//! reserved local socket, the network interfaces the daemon listens on, the
//! trust rules it starts with and the operational limits of the routing core.
//!
//! List-valued settings (interfaces and trust rules) are stored as their
//! textual form so every layer can express them uniformly; the typed views
//! are produced by [`Config::interface_specs`], [`Config::machine_trust_specs`],
//! [`Config::user_trust_specs`] and [`Config::delegate_specs`].

mod defaults;
mod delegate;
mod interface;
mod logging;
mod runtime;
mod socket;
mod trust;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_RETRY_DELAY_MS, DEFAULT_INTERFACE,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_WORKERS, DEFAULT_TCP_PORT,
    DEFAULT_TRUST_LEVEL, default_log_filter, default_log_format, default_socket_endpoint,
};
pub use delegate::{DelegateSpec, DelegateSpecParseError};
pub use interface::{InterfaceParseError, InterfaceSpec, LOCAL_INTERFACE};
pub use logging::{LogFormat, LogFormatParseError, TracePoint, TracePointParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};
pub use trust::{MAX_TRUST_LEVEL, TrustSpec, TrustSpecParseError};

/// Daemon configuration resolved from every configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "STAFD")]
pub struct Config {
    /// Name reported to peers; empty means "use the host name".
    #[ortho_config(default = String::new())]
    pub machine_nickname: String,
    /// Socket backing the reserved `local` interface.
    #[ortho_config(default = defaults::default_socket_endpoint())]
    pub local_socket: SocketEndpoint,
    /// Network interfaces in `name=tcp://host:port[;secure]` form.
    #[ortho_config(default = defaults::default_interfaces())]
    pub interfaces: Vec<String>,
    /// Interface used for outbound connections without an explicit prefix.
    #[ortho_config(default = DEFAULT_INTERFACE.to_owned())]
    pub default_interface: String,
    /// Retry other interfaces when the chosen one cannot connect.
    #[ortho_config(default = true)]
    pub interface_cycling: bool,
    /// Connection attempts per interface.
    #[ortho_config(default = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,
    /// Upper bound of the random delay between attempts, in milliseconds.
    #[ortho_config(default = DEFAULT_CONNECT_RETRY_DELAY_MS)]
    pub connect_retry_delay_ms: u64,
    /// Trust level granted when no rule matches.
    #[ortho_config(default = DEFAULT_TRUST_LEVEL)]
    pub default_trust: u32,
    /// Machine trust rules in `interface://host=level` form.
    #[ortho_config(default = defaults::default_machine_trust())]
    pub machine_trust: Vec<String>,
    /// User trust rules in `authenticator://user=level` form.
    #[ortho_config(default = Vec::new())]
    pub user_trust: Vec<String>,
    /// Services forwarded to other machines, in `NAME=machine[/SERVICE]` form.
    #[ortho_config(default = Vec::new())]
    pub delegated_services: Vec<String>,
    /// Re-check trust for copies between handles of the same daemon.
    #[ortho_config(default = false)]
    pub strict_fs_copy_trust: bool,
    /// Result size in megabytes above which a warning is logged; 0 disables
    /// it.
    #[ortho_config(default = 0)]
    pub result_warning_size: u32,
    /// Longest string or buffer, in bytes, accepted from a peer.
    #[ortho_config(default = DEFAULT_MAX_PAYLOAD_SIZE)]
    pub max_payload_size: u32,
    /// Maximum number of connections serviced concurrently.
    #[ortho_config(default = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,
    /// Codepage of files on this machine.
    #[ortho_config(default = defaults::default_codepage())]
    pub codepage: String,
    /// Line ending applied to text copies when the request names none.
    #[ortho_config(default = defaults::default_text_eol())]
    pub text_eol: String,
    /// Tracing filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Request trace points that are logged, for example `service_errors`.
    #[ortho_config(default = defaults::default_trace_points())]
    pub trace_points: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            machine_nickname: String::new(),
            local_socket: defaults::default_socket_endpoint(),
            interfaces: defaults::default_interfaces(),
            default_interface: DEFAULT_INTERFACE.to_owned(),
            interface_cycling: true,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_retry_delay_ms: DEFAULT_CONNECT_RETRY_DELAY_MS,
            default_trust: DEFAULT_TRUST_LEVEL,
            machine_trust: defaults::default_machine_trust(),
            user_trust: Vec::new(),
            delegated_services: Vec::new(),
            strict_fs_copy_trust: false,
            result_warning_size: 0,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            codepage: defaults::default_codepage(),
            text_eol: defaults::default_text_eol(),
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            trace_points: defaults::default_trace_points(),
        }
    }
}

impl Config {
    /// Socket backing the reserved `local` interface.
    #[must_use]
    pub fn local_socket(&self) -> &SocketEndpoint {
        &self.local_socket
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Parses the configured network interfaces.
    pub fn interface_specs(&self) -> Result<Vec<InterfaceSpec>, InterfaceParseError> {
        self.interfaces.iter().map(|spec| spec.parse()).collect()
    }

    /// Parses the configured machine trust rules.
    pub fn machine_trust_specs(&self) -> Result<Vec<TrustSpec>, TrustSpecParseError> {
        self.machine_trust.iter().map(|spec| spec.parse()).collect()
    }

    /// Parses the configured user trust rules.
    pub fn user_trust_specs(&self) -> Result<Vec<TrustSpec>, TrustSpecParseError> {
        self.user_trust.iter().map(|spec| spec.parse()).collect()
    }

    /// Parses the enabled trace points.
    pub fn trace_point_specs(&self) -> Result<Vec<TracePoint>, TracePointParseError> {
        self.trace_points.iter().map(|point| point.parse()).collect()
    }

    /// Parses the configured delegated services.
    pub fn delegate_specs(&self) -> Result<Vec<DelegateSpec>, DelegateSpecParseError> {
        self.delegated_services.iter().map(|spec| spec.parse()).collect()
    }
}
