//! Name to service table.
//!
//! Lookups are case-insensitive. A miss consults the registered
//! [`ServiceLoader`]s in order; the first loader that can provide the service
//! builds it and the result is kept for later requests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use staf_proto::ReturnCode;

use super::{AuthenticatorRegistry, SERVICE_TARGET, Service};

/// Builds services on demand.
pub(crate) trait ServiceLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `service` if this loader provides it.
    fn load(&self, service: &str) -> Option<Arc<dyn Service>>;
}

pub(crate) struct ServiceRegistry {
    services: RwLock<BTreeMap<String, Arc<dyn Service>>>,
    loaders: RwLock<Vec<Arc<dyn ServiceLoader>>>,
    authenticators: AuthenticatorRegistry,
}

impl ServiceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            loaders: RwLock::new(Vec::new()),
            authenticators: AuthenticatorRegistry::new(),
        }
    }

    pub(crate) fn insert(&self, service: Arc<dyn Service>) -> ReturnCode {
        let key = service.name().to_ascii_uppercase();
        let mut services = self.services.write();
        if services.contains_key(&key) {
            return ReturnCode::AlreadyExists;
        }
        services.insert(key, service);
        ReturnCode::Ok
    }

    pub(crate) fn remove(&self, name: &str) -> ReturnCode {
        match self.services.write().remove(&name.to_ascii_uppercase()) {
            Some(_) => ReturnCode::Ok,
            None => ReturnCode::DoesNotExist,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        let key = name.to_ascii_uppercase();
        if let Some(service) = self.services.read().get(&key) {
            return Some(Arc::clone(service));
        }
        let loaders = self.loaders.read().clone();
        let (loader, service) = loaders
            .iter()
            .find_map(|loader| loader.load(name).map(|service| (loader, service)))?;
        info!(
            target: SERVICE_TARGET,
            service = name,
            loader = loader.name(),
            "service loaded on demand"
        );
        let mut services = self.services.write();
        Some(Arc::clone(services.entry(key).or_insert(service)))
    }

    /// Registered service names in sorted order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    pub(crate) fn add_loader(&self, loader: Arc<dyn ServiceLoader>) {
        self.loaders.write().push(loader);
    }

    pub(crate) fn loader_names(&self) -> Vec<String> {
        self.loaders
            .read()
            .iter()
            .map(|loader| loader.name().to_owned())
            .collect()
    }

    pub(crate) fn authenticators(&self) -> &AuthenticatorRegistry {
        &self.authenticators
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .field("loaders", &self.loader_names())
            .field("authenticators", &self.authenticators)
            .finish()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
