//! Installation of the daemon's tracing subscriber.
//!
//! The filter starts from `log_filter` and then silences every trace point
//! the configuration leaves out. Request events are emitted on the per-point
//! targets below so they can be switched off independently of their level.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::{EnvFilter, filter::Directive};

use stafd_config::{Config, LogFormat, TracePoint};

pub(crate) const TRACE_SERVICE_REQUESTS: &str =
    concat!(env!("CARGO_PKG_NAME"), "::trace::service_requests");
pub(crate) const TRACE_SERVICE_RESULTS: &str =
    concat!(env!("CARGO_PKG_NAME"), "::trace::service_results");
pub(crate) const TRACE_SERVICE_ERRORS: &str =
    concat!(env!("CARGO_PKG_NAME"), "::trace::service_errors");
pub(crate) const TRACE_ACCESS_DENIED: &str =
    concat!(env!("CARGO_PKG_NAME"), "::trace::access_denied");
pub(crate) const TRACE_REMOTE_REQUESTS: &str =
    concat!(env!("CARGO_PKG_NAME"), "::trace::remote_requests");

static SUBSCRIBER: OnceCell<()> = OnceCell::new();

/// Proof that the global subscriber is in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter expression or a derived directive did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// A configured trace point is not one the daemon knows.
    #[error("unknown trace point: {0}")]
    TracePoint(String),
    /// Another subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Target carrying the events of `point`.
pub(crate) const fn trace_target(point: TracePoint) -> &'static str {
    match point {
        TracePoint::ServiceRequests => TRACE_SERVICE_REQUESTS,
        TracePoint::ServiceResults => TRACE_SERVICE_RESULTS,
        TracePoint::ServiceErrors => TRACE_SERVICE_ERRORS,
        TracePoint::AccessDenied => TRACE_ACCESS_DENIED,
        TracePoint::RemoteRequests => TRACE_REMOTE_REQUESTS,
    }
}

/// Installs the global subscriber on first use; later calls are no-ops.
///
/// Output goes to standard error, which the daemoniser redirects to
/// `stafd.out` once the process detaches.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    SUBSCRIBER
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

/// Builds the event filter for `config`.
fn event_filter(config: &Config) -> Result<EnvFilter, TelemetryError> {
    let enabled = config
        .trace_point_specs()
        .map_err(|error| TelemetryError::TracePoint(error.to_string()))?;
    let mut filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    for point in TracePoint::ALL.into_iter().filter(|point| !enabled.contains(point)) {
        let directive = format!("{}=off", trace_target(point))
            .parse::<Directive>()
            .map_err(|error| TelemetryError::Filter(error.to_string()))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = event_filter(config)?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
