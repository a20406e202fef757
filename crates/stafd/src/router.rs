//! Shared state every connection handler works against.
//!
//! The router owns the managers (trust, connections, services, handles,
//! requests, copies) and the daemon-wide variable pools. Handlers receive it
//! by reference; nothing here is a process global, so tests build isolated
//! routers.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use stafd_config::{Config, DelegateSpecParseError, InterfaceParseError, TrustSpecParseError};

use crate::connections::{ConnectionManager, InterfaceError};
use crate::copy::CopyRegistry;
use crate::handles::HandleManager;
use crate::identity::Identity;
use crate::process::ShutdownLatch;
use crate::requests::RequestManager;
use crate::services::{DelegatedService, SERVICE_TARGET, ServiceRegistry, register_builtins};
use crate::settings::Settings;
use crate::transport::SocketProvider;
use crate::trust::TrustManager;
use crate::variables::{self, VariablePool, system};

/// Errors raised while assembling a router from configuration.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A trust rule could not be parsed.
    #[error("invalid trust rule: {0}")]
    TrustSpec(#[from] TrustSpecParseError),
    /// An interface specification could not be parsed.
    #[error("invalid interface: {0}")]
    InterfaceParse(#[from] InterfaceParseError),
    /// A provider could not be registered.
    #[error("interface registration failed: {0}")]
    Interface(#[source] InterfaceError),
    /// A delegated service could not be parsed.
    #[error("invalid delegated service: {0}")]
    Delegate(#[from] DelegateSpecParseError),
    /// A delegated service shadows one already registered.
    #[error("delegated service {0} is already registered")]
    DuplicateService(String),
}

#[derive(Debug)]
pub(crate) struct Router {
    identity: Identity,
    settings: Arc<Settings>,
    trust: TrustManager,
    connections: ConnectionManager,
    services: ServiceRegistry,
    handles: HandleManager,
    requests: RequestManager,
    copies: CopyRegistry,
    system_pool: VariablePool,
    shared_pool: VariablePool,
    shutdown: ShutdownLatch,
}

impl Router {
    /// Builds the router and registers the local and network interfaces.
    pub(crate) fn from_config(config: &Config) -> Result<Self, RouterError> {
        let identity = Identity::from_config(config);
        let settings = Arc::new(Settings::from_config(config));
        let trust = TrustManager::from_config(config)?;
        let connections = ConnectionManager::new(Arc::clone(&settings), config.interface_cycling);
        connections
            .add(Arc::new(SocketProvider::local(config.local_socket())))
            .map_err(RouterError::Interface)?;
        for spec in config.interface_specs()? {
            connections
                .add(Arc::new(SocketProvider::network(&spec, identity.machine())))
                .map_err(RouterError::Interface)?;
        }
        if !config.default_interface.is_empty() {
            connections
                .set_default_interface(&config.default_interface)
                .map_err(RouterError::Interface)?;
        }
        let router = Self::new(identity, settings, trust, connections);
        for spec in config.delegate_specs()? {
            let service = DelegatedService::new(spec.name(), spec.machine(), spec.service());
            if !router.services.insert(Arc::new(service)).is_ok() {
                return Err(RouterError::DuplicateService(spec.name().to_owned()));
            }
            info!(
                target: SERVICE_TARGET,
                service = spec.name(),
                machine = spec.machine(),
                target_service = spec.service(),
                "delegated service registered"
            );
        }
        Ok(router)
    }

    /// Assembles a router from already-built parts.
    pub(crate) fn new(
        identity: Identity,
        settings: Arc<Settings>,
        trust: TrustManager,
        connections: ConnectionManager,
    ) -> Self {
        let system_pool = VariablePool::new();
        system_pool.set(system::MACHINE, identity.machine());
        system_pool.set(system::MACHINE_NICKNAME, identity.nickname());
        system_pool.set(system::CODEPAGE, settings.codepage());
        system_pool.set(system::INSTANCE_UUID, identity.instance_uuid());
        let services = ServiceRegistry::new();
        register_builtins(&services);
        Self {
            identity,
            settings,
            trust,
            connections,
            services,
            handles: HandleManager::new(),
            requests: RequestManager::new(),
            copies: CopyRegistry::new(),
            system_pool,
            shared_pool: VariablePool::new(),
            shutdown: ShutdownLatch::new(),
        }
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn trust(&self) -> &TrustManager {
        &self.trust
    }

    pub(crate) fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub(crate) fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub(crate) fn handles(&self) -> &HandleManager {
        &self.handles
    }

    pub(crate) fn requests(&self) -> &RequestManager {
        &self.requests
    }

    pub(crate) fn copies(&self) -> &CopyRegistry {
        &self.copies
    }

    pub(crate) fn shared_pool(&self) -> &VariablePool {
        &self.shared_pool
    }

    pub(crate) fn system_pool(&self) -> &VariablePool {
        &self.system_pool
    }

    /// Resolves `template` against `pools`, then the shared and system pools.
    pub(crate) fn resolve(&self, template: &str, pools: &[&VariablePool]) -> String {
        let mut all: Vec<&VariablePool> = pools.to_vec();
        all.push(&self.shared_pool);
        all.push(&self.system_pool);
        variables::resolve(template, &all)
    }

    pub(crate) fn shutdown_latch(&self) -> &ShutdownLatch {
        &self.shutdown
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.trigger();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Routers wired for in-process tests.

    use std::sync::Arc;

    use stafd_config::SocketEndpoint;

    use super::Router;
    use crate::connections::ConnectionManager;
    use crate::identity::Identity;
    use crate::settings::{Settings, SettingsSnapshot};
    use crate::transport::SocketProvider;
    use crate::trust::TrustManager;

    /// Router with a local provider on a throwaway socket path and no
    /// network interfaces.
    pub(crate) fn router(default_trust: u32) -> Router {
        router_with(default_trust, SettingsSnapshot::default())
    }

    pub(crate) fn router_with(default_trust: u32, values: SettingsSnapshot) -> Router {
        let settings = Arc::new(Settings::new(values));
        let connections = ConnectionManager::new(Arc::clone(&settings), true);
        let socket = SocketEndpoint::unix(format!(
            "{}/stafd-test-{}.sock",
            std::env::temp_dir().display(),
            uuid::Uuid::new_v4()
        ));
        connections
            .add(Arc::new(SocketProvider::local(&socket)))
            .expect("local provider");
        Router::new(
            Identity::new("testhost.example.com", "testhost"),
            settings,
            TrustManager::new(default_trust),
            connections,
        )
    }
}
