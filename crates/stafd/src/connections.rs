//! Registry of connection providers and the outbound connection policy.
//!
//! Destinations are `[interface://]host[:port]`. Without an explicit
//! interface the endpoint cache is consulted for the interface that last
//! reached the same endpoint, falling back to the default interface. When
//! automatic interface cycling is enabled, a failed attempt is retried on
//! every other registered interface before giving up.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use staf_proto::ReturnCode;
use stafd_config::LOCAL_INTERFACE;

use crate::clock;
use crate::endpoint::{Endpoint, split_specification};
use crate::settings::Settings;
use crate::transport::{ConnectError, Connection, ConnectionProvider, WireStream};

const CONNECTIONS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connections");

/// Failures while changing the set of interfaces.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum InterfaceError {
    #[error("Interface {0} already exists")]
    AlreadyExists(String),
    #[error("Interface {existing} is already using port {port}")]
    PortInUse { existing: String, port: u16 },
    #[error("Interface {0} does not exist")]
    DoesNotExist(String),
}

impl InterfaceError {
    pub(crate) fn rc(&self) -> ReturnCode {
        match self {
            Self::AlreadyExists(_) => ReturnCode::AlreadyExists,
            Self::PortInUse { .. } => ReturnCode::InvalidValue,
            Self::DoesNotExist(_) => ReturnCode::DoesNotExist,
        }
    }
}

/// Failures while opening an outbound connection.
#[derive(Debug, Error)]
pub(crate) enum RouteError {
    #[error("No such interface: {interface}, Endpoint: {destination}")]
    UnknownInterface {
        interface: String,
        destination: String,
    },
    #[error("{source}: {code}, Endpoint: {interface}://{endpoint}")]
    Unreachable {
        interface: String,
        endpoint: String,
        code: i32,
        #[source]
        source: ConnectError,
    },
}

/// An open outbound connection and the interface that carried it.
#[derive(Debug)]
pub(crate) struct Route {
    pub(crate) connection: Connection,
    pub(crate) provider: Arc<dyn ConnectionProvider>,
}

/// A route with its stream boxed, as conversations that may be replayed on
/// a fresh connection consume it.
pub(crate) struct Link {
    pub(crate) stream: Box<dyn WireStream>,
    pub(crate) provider: Arc<dyn ConnectionProvider>,
}

impl From<Route> for Link {
    fn from(route: Route) -> Self {
        Self {
            stream: Box::new(route.connection),
            provider: route.provider,
        }
    }
}

/// Source of fresh links to one machine. A refused API is retried on a new
/// link.
pub(crate) type Dial<'a> = dyn FnMut() -> Result<Link, crate::services::ServiceResult> + 'a;

/// One endpoint cache entry as listed to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EndpointCacheEntry {
    pub(crate) endpoint: String,
    pub(crate) interface: String,
    /// RFC 3339 time the entry was added.
    pub(crate) created_at: String,
}

#[derive(Debug, Clone)]
struct CachedInterface {
    interface: String,
    created_at: String,
}

/// Interface summary as listed to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InterfaceSummary {
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) endpoint: String,
    pub(crate) secure: bool,
    pub(crate) logical_id: String,
    pub(crate) physical_id: String,
}

pub(crate) struct ConnectionManager {
    providers: Mutex<Vec<Arc<dyn ConnectionProvider>>>,
    default_interface: Mutex<String>,
    cycling: Mutex<bool>,
    endpoint_cache: Mutex<BTreeMap<String, CachedInterface>>,
    settings: Arc<Settings>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .providers()
            .iter()
            .map(|provider| provider.name().to_owned())
            .collect();
        formatter
            .debug_struct("ConnectionManager")
            .field("providers", &names)
            .field("default_interface", &self.default_interface())
            .field("cycling", &self.cycling())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub(crate) fn new(settings: Arc<Settings>, cycling: bool) -> Self {
        Self {
            providers: Mutex::new(Vec::new()),
            default_interface: Mutex::new(String::new()),
            cycling: Mutex::new(cycling),
            endpoint_cache: Mutex::new(BTreeMap::new()),
            settings,
        }
    }

    /// Registers a provider. The first non-local provider becomes the
    /// default.
    pub(crate) fn add(&self, provider: Arc<dyn ConnectionProvider>) -> Result<(), InterfaceError> {
        let name = provider.name().to_ascii_lowercase();
        let mut providers = self.providers.lock();
        if providers
            .iter()
            .any(|existing| existing.name().eq_ignore_ascii_case(&name))
        {
            return Err(InterfaceError::AlreadyExists(name));
        }
        if let Some(port) = provider.listen_endpoint().port().filter(|port| *port != 0)
            && let Some(existing) = providers
                .iter()
                .find(|existing| existing.listen_endpoint().port() == Some(port))
        {
            return Err(InterfaceError::PortInUse {
                existing: existing.name().to_owned(),
                port,
            });
        }
        providers.push(provider);
        drop(providers);

        let mut default = self.default_interface.lock();
        if default.is_empty() || default.as_str() == LOCAL_INTERFACE {
            *default = name;
        }
        Ok(())
    }

    /// Unregisters a provider, moving the default elsewhere if needed.
    pub(crate) fn remove(&self, name: &str) -> Result<Arc<dyn ConnectionProvider>, InterfaceError> {
        let mut providers = self.providers.lock();
        let index = providers
            .iter()
            .position(|provider| provider.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| InterfaceError::DoesNotExist(name.to_owned()))?;
        let removed = providers.remove(index);
        let fallback = providers
            .iter()
            .find(|provider| provider.name() != LOCAL_INTERFACE)
            .or_else(|| providers.first())
            .map(|provider| provider.name().to_owned())
            .unwrap_or_default();
        drop(providers);

        let mut default = self.default_interface.lock();
        if default.eq_ignore_ascii_case(name) {
            *default = fallback;
        }
        Ok(removed)
    }

    pub(crate) fn provider(&self, name: &str) -> Option<Arc<dyn ConnectionProvider>> {
        self.providers
            .lock()
            .iter()
            .find(|provider| provider.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Copy of the provider list in registration order.
    pub(crate) fn providers(&self) -> Vec<Arc<dyn ConnectionProvider>> {
        self.providers.lock().clone()
    }

    pub(crate) fn summaries(&self) -> Vec<InterfaceSummary> {
        self.providers()
            .iter()
            .map(|provider| InterfaceSummary {
                name: provider.name().to_owned(),
                kind: provider.kind().to_owned(),
                endpoint: provider.listen_endpoint().to_string(),
                secure: provider.is_secure(),
                logical_id: provider.logical_id().to_owned(),
                physical_id: provider.physical_id().to_owned(),
            })
            .collect()
    }

    pub(crate) fn default_interface(&self) -> String {
        self.default_interface.lock().clone()
    }

    pub(crate) fn set_default_interface(&self, name: &str) -> Result<(), InterfaceError> {
        let provider = self
            .provider(name)
            .ok_or_else(|| InterfaceError::DoesNotExist(name.to_owned()))?;
        *self.default_interface.lock() = provider.name().to_owned();
        Ok(())
    }

    pub(crate) fn cycling(&self) -> bool {
        *self.cycling.lock()
    }

    pub(crate) fn set_cycling(&self, enabled: bool) {
        *self.cycling.lock() = enabled;
    }

    /// Opens a connection to `destination`.
    pub(crate) fn connect(&self, destination: &str) -> Result<Route, RouteError> {
        let destination = destination.trim();
        let cycling = self.cycling();
        let (explicit, host) = split_specification(destination);
        let mut interface_specified = true;
        let mut from_cache = false;
        let interface = match explicit {
            Some(interface) => interface.to_ascii_lowercase(),
            None if host.eq_ignore_ascii_case(LOCAL_INTERFACE) => LOCAL_INTERFACE.to_owned(),
            None if cycling => {
                interface_specified = false;
                match self.cached_interface(host) {
                    Some(interface) => {
                        from_cache = true;
                        interface
                    }
                    None => self.default_interface(),
                }
            }
            None => self.default_interface(),
        };
        let provider = self
            .provider(&interface)
            .ok_or_else(|| RouteError::UnknownInterface {
                interface: interface.clone(),
                destination: destination.to_owned(),
            })?;

        let endpoint = Endpoint::parse(host);
        let first_error = match self.attempt(&provider, &endpoint) {
            Ok(connection) => return Ok(Route { connection, provider }),
            Err(error) => error,
        };
        if from_cache {
            self.remove_cached(host);
        }
        if interface_specified || !cycling {
            return Err(first_error);
        }

        for candidate in self.providers() {
            let name = candidate.name();
            if name == interface || name == LOCAL_INTERFACE {
                continue;
            }
            if let Ok(connection) = self.attempt(&candidate, &endpoint) {
                debug!(
                    target: CONNECTIONS_TARGET,
                    endpoint = host,
                    interface = name,
                    "reached endpoint through another interface"
                );
                self.cache_interface(host, name);
                return Ok(Route {
                    connection,
                    provider: candidate,
                });
            }
        }
        Err(first_error)
    }

    fn attempt(
        &self,
        provider: &Arc<dyn ConnectionProvider>,
        endpoint: &Endpoint,
    ) -> Result<Connection, RouteError> {
        let attempts = self.settings.connect_attempts().max(1);
        let max_delay = self.settings.connect_retry_delay();
        let mut attempt = 1;
        loop {
            let error = match provider.connect(endpoint) {
                Ok(connection) => return Ok(connection),
                Err(source) => RouteError::Unreachable {
                    interface: provider.name().to_owned(),
                    endpoint: endpoint.to_string(),
                    code: source.os_code(),
                    source,
                },
            };
            let delay = if attempt < attempts {
                random_delay(max_delay)
            } else {
                Duration::ZERO
            };
            warn!(
                target: CONNECTIONS_TARGET,
                attempt,
                attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "connection attempt failed"
            );
            if attempt >= attempts {
                return Err(error);
            }
            thread::sleep(delay);
            attempt += 1;
        }
    }

    pub(crate) fn cached_interface(&self, endpoint: &str) -> Option<String> {
        self.endpoint_cache
            .lock()
            .get(endpoint)
            .map(|entry| entry.interface.clone())
    }

    /// Remembers the interface that reached `endpoint`. The default interface
    /// is never cached since it is tried first anyway.
    pub(crate) fn cache_interface(&self, endpoint: &str, interface: &str) {
        if self.default_interface.lock().as_str() == interface {
            return;
        }
        self.endpoint_cache.lock().insert(
            endpoint.to_owned(),
            CachedInterface {
                interface: interface.to_owned(),
                created_at: clock::now(),
            },
        );
    }

    pub(crate) fn remove_cached(&self, endpoint: &str) -> bool {
        self.endpoint_cache.lock().remove(endpoint).is_some()
    }

    /// Empties the endpoint cache, returning how many entries were dropped.
    pub(crate) fn purge_cache(&self) -> usize {
        let mut cache = self.endpoint_cache.lock();
        let purged = cache.len();
        cache.clear();
        purged
    }

    pub(crate) fn endpoint_cache(&self) -> Vec<EndpointCacheEntry> {
        self.endpoint_cache
            .lock()
            .iter()
            .map(|(endpoint, entry)| EndpointCacheEntry {
                endpoint: endpoint.clone(),
                interface: entry.interface.clone(),
                created_at: entry.created_at.clone(),
            })
            .collect()
    }
}

fn random_delay(max_delay: Duration) -> Duration {
    let max_ms = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
