//! Forwarding a request to another daemon.
//!
//! The current API carries the caller's identity and variable pools. A peer
//! that refuses it is asked again on a fresh connection with the original
//! framing, which carries only the machine, handle and request.

use tracing::{error, warn};

use staf_proto::{Api, ReadWire, ReturnCode, WireError, WriteWire};

use super::SUBMIT_TARGET;
use crate::connections::Dial;
use crate::dispatch::{Opened, open_api, open_legacy_api};
use crate::handles::Authentication;
use crate::router::Router;
use crate::services::{ServiceRequest, ServiceResult};
use crate::transport::{ConnectionProvider, WireStream};

/// Sends `request` over links from `connect` and returns the peer's answer.
///
/// Connect failures come back as the error `connect` produced. Stream
/// failures become `CommunicationError` and garbled replies `UnknownError`.
pub(crate) fn forward(
    router: &Router,
    request: &ServiceRequest,
    connect: &mut Dial<'_>,
) -> ServiceResult {
    exchange(router, request, connect).unwrap_or_else(|error| {
        let rc = if error.is_malformed() {
            ReturnCode::UnknownError
        } else {
            ReturnCode::CommunicationError
        };
        ServiceResult::error(rc, error.to_string())
    })
}

fn exchange(
    router: &Router,
    request: &ServiceRequest,
    connect: &mut Dial<'_>,
) -> Result<ServiceResult, WireError> {
    let mut link = match connect() {
        Ok(link) => link,
        Err(unreachable) => return Ok(unreachable),
    };
    let current = match open_api(&mut *link.stream, Api::RemoteServiceRequestV2, 2..=2)? {
        Opened::Level(_) => true,
        Opened::NoCommonLevel => {
            return Ok(ServiceResult::error(ReturnCode::InvalidApiLevel, ""));
        }
        Opened::Refused(_) => {
            link = match connect() {
                Ok(link) => link,
                Err(unreachable) => return Ok(unreachable),
            };
            let ack = open_legacy_api(&mut *link.stream, Api::RemoteServiceRequest, 0)?;
            if !ack.is_ok() {
                return Ok(ServiceResult::error(ack, ""));
            }
            false
        }
    };

    let provider = link.provider.as_ref();
    let stream = &mut *link.stream;
    if current {
        let port = provider.port().map(|port| format!(":{port}")).unwrap_or_default();
        stream.write_string(&port)?;
        stream.write_string(&request.instance_uuid)?;
    } else {
        stream.write_string(router.identity().machine())?;
    }
    stream.write_uint(request.handle)?;
    stream.write_string(&request.handle_name)?;
    stream.write_string(&request.service)?;
    stream.write_string(&request.request)?;
    if current {
        let identity = credentials(router, request, provider);
        stream.write_string(&identity.authenticator)?;
        stream.write_string(&identity.user)?;
        stream.write_string(&identity.data)?;
        stream.write_string(&request.machine_nickname)?;
        stream.write_pairs(&request.request_pool.pairs())?;
        stream.write_pairs(&router.shared_pool().pairs())?;
    }

    let rc = stream.read_rc()?;
    let result = read_result(router, request, stream, rc)?;
    Ok(ServiceResult::new(rc, result))
}

/// Credentials to present, withheld on transports that cannot carry them.
fn credentials(
    router: &Router,
    request: &ServiceRequest,
    provider: &dyn ConnectionProvider,
) -> Authentication {
    let authenticators = router.services().authenticators();
    if authenticators.requires_secure(&request.authenticator) && !provider.is_secure() {
        return Authentication::anonymous();
    }
    Authentication {
        authenticator: request.authenticator.clone(),
        user: request.user_id.clone(),
        data: request.auth_data.clone(),
    }
}

fn read_result(
    router: &Router,
    request: &ServiceRequest,
    stream: &mut dyn WireStream,
    rc: ReturnCode,
) -> Result<String, WireError> {
    let settings = router.settings();
    if settings.result_warning_bytes().is_none() {
        return stream.read_string();
    }
    let length = stream.read_uint()?;
    if settings.result_is_large(u64::from(length)) {
        warn!(
            target: SUBMIT_TARGET,
            bytes = length,
            rc = %rc,
            service = %request.service,
            machine = %request.target_machine,
            handle = request.handle,
            "result size is large"
        );
    }
    match stream.read_bytes(length) {
        Ok(bytes) => String::from_utf8(bytes).map_err(WireError::InvalidUtf8),
        Err(WireError::Allocation { len }) => {
            error!(
                target: SUBMIT_TARGET,
                bytes = len,
                service = %request.service,
                machine = %request.target_machine,
                "unable to allocate the result"
            );
            Ok(String::new())
        }
        Err(other) => Err(other),
    }
}
