//! Locally implemented capabilities and the request they receive.
//!
//! A [`Service`] is looked up by name in the [`ServiceRegistry`] and handed a
//! fully described [`ServiceRequest`]. Every outcome is a [`ServiceResult`]:
//! a numeric return code with a text result. Services never panic across
//! this boundary; the submission path treats a panic as an unknown error.

mod authenticator;
mod delay;
mod delegated;
mod fs;
mod misc;
mod options;
mod ping;
mod queue;
mod registry;
mod shutdown;
mod trust;

use std::fmt;
use std::sync::Arc;

use staf_proto::{ReturnCode, SyncMode};

use crate::router::Router;
use crate::variables::VariablePool;

pub(crate) use self::authenticator::{Authenticator, AuthenticatorRegistry};
pub(crate) use self::delegated::DelegatedService;
pub(crate) use self::options::{OptionParser, ParsedRequest, wrap_data};
pub(crate) use self::registry::{ServiceLoader, ServiceRegistry};

/// Tracing target for service execution.
pub(crate) const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::services");

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceResult {
    pub(crate) rc: ReturnCode,
    pub(crate) result: String,
    pub(crate) shutdown: bool,
}

impl ServiceResult {
    pub(crate) fn new(rc: ReturnCode, result: impl Into<String>) -> Self {
        Self {
            rc,
            result: result.into(),
            shutdown: false,
        }
    }

    pub(crate) fn ok(result: impl Into<String>) -> Self {
        Self::new(ReturnCode::Ok, result)
    }

    pub(crate) fn error(rc: ReturnCode, result: impl Into<String>) -> Self {
        Self::new(rc, result)
    }

    /// Successful result that also asks the daemon to stop after replying.
    pub(crate) fn shutdown() -> Self {
        Self {
            rc: ReturnCode::Ok,
            result: String::new(),
            shutdown: true,
        }
    }

    pub(crate) fn is_ok(&self) -> bool {
        self.rc.is_ok()
    }

    /// Serialises a value as the result text.
    pub(crate) fn json<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(text) => Self::ok(text),
            Err(error) => Self::error(ReturnCode::UnknownError, error.to_string()),
        }
    }
}

impl fmt::Display for ServiceResult {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "rc={} result={}", self.rc, self.result)
    }
}

/// One request routed to a service.
#[derive(Debug, Clone, Default)]
pub(crate) struct ServiceRequest {
    pub(crate) sync_mode: SyncMode,
    pub(crate) handle: u32,
    pub(crate) handle_name: String,
    /// Logical name of the requesting machine.
    pub(crate) machine: String,
    pub(crate) machine_nickname: String,
    pub(crate) target_machine: String,
    pub(crate) service: String,
    pub(crate) request: String,
    /// Provider the request arrived on.
    pub(crate) interface: String,
    pub(crate) logical_id: String,
    pub(crate) physical_id: String,
    /// `interface://machine[:port]` of the requester.
    pub(crate) endpoint: String,
    pub(crate) port: String,
    pub(crate) authenticator: String,
    pub(crate) user_id: String,
    pub(crate) auth_data: String,
    /// Instance UUID of the daemon the request originated on.
    pub(crate) instance_uuid: String,
    pub(crate) is_local_request: bool,
    pub(crate) request_number: u32,
    pub(crate) trust_level: u32,
    pub(crate) request_pool: Arc<VariablePool>,
    pub(crate) source_shared_pool: Arc<VariablePool>,
}

impl ServiceRequest {
    /// `authenticator://user` form of the requester's identity.
    pub(crate) fn user(&self) -> String {
        format!("{}://{}", self.authenticator, self.user_id)
    }

    /// Fails with `AccessDenied` unless the requester has `required` trust.
    pub(crate) fn require_trust(&self, required: u32, action: &str) -> Result<(), ServiceResult> {
        if self.trust_level >= required {
            return Ok(());
        }
        Err(ServiceResult::error(
            ReturnCode::AccessDenied,
            format!(
                "Trust level {required} required for the {} service's {action} request\n\
                 Requester has trust level {} on machine {}\n\
                 Requesting machine: {}\nRequesting user   : {}",
                self.service,
                self.trust_level,
                self.target_machine,
                self.endpoint,
                self.user()
            ),
        ))
    }
}

/// A named capability reachable through the router.
pub(crate) trait Service: Send + Sync {
    /// Registered name, compared case-insensitively.
    fn name(&self) -> &str;

    /// Executes one request.
    fn accept(&self, router: &Router, request: &ServiceRequest) -> ServiceResult;
}

/// Result for a request whose first word names no command of its service.
pub(crate) fn unknown_command(request: &ServiceRequest) -> ServiceResult {
    let word = request.request.split_whitespace().next().unwrap_or_default();
    ServiceResult::error(
        ReturnCode::InvalidRequestString,
        format!("Unknown {} request: {word}", request.service),
    )
}

/// Registers the services every daemon provides.
pub(crate) fn register_builtins(registry: &ServiceRegistry) {
    let builtins: [Arc<dyn Service>; 7] = [
        Arc::new(ping::PingService),
        Arc::new(misc::MiscService),
        Arc::new(trust::TrustService),
        Arc::new(queue::QueueService),
        Arc::new(fs::FsService),
        Arc::new(shutdown::ShutdownService),
        Arc::new(delay::DelayService),
    ];
    for service in builtins {
        registry.insert(service);
    }
}
