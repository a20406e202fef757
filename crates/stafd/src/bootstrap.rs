//! Daemon bootstrap orchestration.
//!
//! Bootstrap turns a configuration into a [`Daemon`]: telemetry is installed,
//! the `local` socket directory is prepared and the router is assembled with
//! its interfaces, trust rules and services. Nothing listens until
//! [`Daemon::serve`] binds the interfaces.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use stafd_config::{Config, SocketPreparationError};

use crate::dispatch::DispatchConnectionHandler;
use crate::health::HealthReporter;
use crate::router::{Router, RouterError};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{ConnectionHandler, ListenerError, ListenerHandle, WorkerPool};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a configuration resolved earlier.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already loaded configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare local socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// Interfaces, trust rules or services could not be assembled.
    #[error("failed to assemble the router: {source}")]
    Router {
        /// Underlying router error.
        #[source]
        source: RouterError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    router: Arc<Router>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Whether a `SHUTDOWN` request or a dispatch shutdown flag was seen.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.router.shutdown_latch().is_triggered()
    }

    pub(crate) fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Binds every interface and starts accepting connections.
    ///
    /// All interfaces share one worker pool. If any interface fails to bind
    /// the ones already started are stopped again.
    pub(crate) fn serve(&self) -> Result<Interfaces, ListenerError> {
        let pool = WorkerPool::new(self.config.max_workers);
        let handler: Arc<dyn ConnectionHandler> =
            Arc::new(DispatchConnectionHandler::new(Arc::clone(&self.router)));
        let mut interfaces = Interfaces {
            listeners: Vec::new(),
            pool: pool.clone(),
        };
        for provider in self.router.connections().providers() {
            let started = provider.bind().and_then(|listener| {
                listener.start(Arc::clone(&provider), Arc::clone(&handler), pool.clone())
            });
            match started {
                Ok(handle) => {
                    self.reporter
                        .interface_listening(provider.name(), provider.listen_endpoint());
                    interfaces.listeners.push(handle);
                }
                Err(error) => {
                    self.reporter.interface_failed(provider.name(), &error);
                    interfaces.stop()?;
                    return Err(error);
                }
            }
        }
        Ok(interfaces)
    }
}

/// Running listeners and the pool serving their connections.
pub(crate) struct Interfaces {
    listeners: Vec<ListenerHandle>,
    pool: WorkerPool,
}

impl Interfaces {
    /// Stops accepting, waits for the accept loops and retires the workers.
    pub(crate) fn stop(self) -> Result<(), ListenerError> {
        for listener in &self.listeners {
            listener.shutdown();
        }
        let mut outcome = Ok(());
        for listener in self.listeners {
            if let Err(error) = listener.join() {
                outcome = Err(error);
            }
        }
        self.pool.shutdown();
        outcome
    }
}

/// Bootstraps the daemon using the supplied collaborators.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    match assemble(loader) {
        Ok((config, router, telemetry)) => {
            reporter.bootstrap_succeeded(&config);
            Ok(Daemon {
                config,
                router: Arc::new(router),
                telemetry,
                reporter,
            })
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn assemble(loader: &dyn ConfigLoader) -> Result<(Config, Router, TelemetryHandle), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    staf_proto::set_payload_limit(config.max_payload_size);
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    config
        .local_socket()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;
    let router = Router::from_config(&config).map_err(|source| BootstrapError::Router { source })?;
    Ok((config, router, telemetry))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use mockall::mock;
    use rstest::rstest;
    use tempfile::TempDir;

    use stafd_config::SocketEndpoint;

    use super::*;

    mock! {
        Reporter {}
        impl HealthReporter for Reporter {
            fn bootstrap_starting(&self);
            fn bootstrap_succeeded(&self, config: &Config);
            fn bootstrap_failed(&self, error: &BootstrapError);
            fn interface_listening(&self, interface: &str, endpoint: &SocketEndpoint);
            fn interface_failed(&self, interface: &str, error: &ListenerError);
        }
    }

    fn config_with_tcp(dir: &TempDir, port: u16) -> Config {
        Config {
            local_socket: SocketEndpoint::unix(format!("{}/stafd.sock", dir.path().display())),
            interfaces: vec![format!("tcp=tcp://127.0.0.1:{port}")],
            ..Config::default()
        }
    }

    #[rstest]
    fn a_busy_interface_stops_the_ones_already_started() {
        let occupied = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = occupied.local_addr().expect("addr").port();
        let dir = TempDir::new().expect("tempdir");

        let mut reporter = MockReporter::new();
        reporter.expect_bootstrap_starting().times(1).return_const(());
        reporter.expect_bootstrap_succeeded().times(1).return_const(());
        reporter
            .expect_interface_listening()
            .withf(|interface, _| interface == "local")
            .times(1)
            .return_const(());
        reporter
            .expect_interface_failed()
            .withf(|interface, _| interface == "tcp")
            .times(1)
            .return_const(());

        let loader = StaticConfigLoader::new(config_with_tcp(&dir, port));
        let daemon = bootstrap_with(&loader, Arc::new(reporter)).expect("bootstrap");
        assert!(daemon.serve().is_err());

        let socket = dir.path().join("stafd.sock");
        assert!(
            std::os::unix::net::UnixStream::connect(socket).is_err(),
            "local interface should have been stopped"
        );
    }

    #[rstest]
    fn invalid_delegations_fail_bootstrap() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config {
            delegated_services: vec!["LOG".to_owned()],
            ..config_with_tcp(&dir, 0)
        };

        let mut reporter = MockReporter::new();
        reporter.expect_bootstrap_starting().times(1).return_const(());
        reporter.expect_bootstrap_failed().times(1).return_const(());

        let result = bootstrap_with(&StaticConfigLoader::new(config), Arc::new(reporter));
        assert!(matches!(
            result,
            Err(BootstrapError::Router {
                source: RouterError::Delegate(_)
            })
        ));
    }
}
