//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use stafd_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once an interface accepts connections.
    fn interface_listening(&self, interface: &str, endpoint: &SocketEndpoint);

    /// Invoked when an interface cannot be bound.
    fn interface_failed(&self, interface: &str, error: &ListenerError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn interface_listening(&self, interface: &str, endpoint: &SocketEndpoint) {
        (**self).interface_listening(interface, endpoint);
    }

    fn interface_failed(&self, interface: &str, error: &ListenerError) {
        (**self).interface_failed(interface, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            local_socket = %config.local_socket(),
            interfaces = config.interfaces.len(),
            default_interface = %config.default_interface,
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn interface_listening(&self, interface: &str, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "interface_listening",
            interface,
            endpoint = %endpoint,
            "interface accepting connections"
        );
    }

    fn interface_failed(&self, interface: &str, error: &ListenerError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "interface_failed",
            interface,
            error = %error,
            "interface failed to start"
        );
    }
}
