//! Service requests arriving from local processes and from other daemons.

use std::sync::Arc;

use tracing::debug;

use staf_proto::{ReadWire, ReturnCode, SyncMode, WireError, WriteWire};

use crate::handles::{Authentication, NO_AUTHENTICATOR};
use crate::identity::is_local_target;
use crate::services::{ServiceRequest, ServiceResult};
use crate::submit::{prepare, submit_local, submit_remote};
use crate::transport::WireStream;
use crate::variables::VariablePool;

use super::DISPATCH_TARGET;
use super::table::{ApiContext, Disposition};

const LOOPBACK_V4: &str = "127.0.0.1";
const LOOPBACK_V6: &str = "0:0:0:0:0:0:0:1";

/// Request fields common to every origin, filled from the connection.
fn inbound(context: &ApiContext<'_>) -> ServiceRequest {
    let router = context.router;
    let peer = context.peer;
    ServiceRequest {
        interface: peer.provider.name().to_owned(),
        logical_id: peer.logical_id.to_owned(),
        physical_id: peer.physical_id.to_owned(),
        machine: peer.logical_id.to_owned(),
        target_machine: router.identity().machine().to_owned(),
        source_shared_pool: Arc::new(VariablePool::new()),
        ..ServiceRequest::default()
    }
}

fn endpoint(request: &ServiceRequest) -> String {
    format!("{}://{}{}", request.interface, request.logical_id, request.port)
}

fn reply(stream: &mut dyn WireStream, result: &ServiceResult) -> Result<Disposition, WireError> {
    stream.write_result(result.rc, &result.result)?;
    Ok(Disposition::from_shutdown(result.shutdown))
}

/// A registered process submitting a request.
///
/// The caller's handle must belong to the caller's process. Requests
/// addressed to `local` run here; anything else is forwarded.
pub(super) fn local(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    let router = context.router;
    let mode = stream.read_uint()?;
    let pid = stream.read_uint()?;
    let handle = stream.read_uint()?;
    let target = stream.read_string()?;
    let service = stream.read_string()?;
    let text = stream.read_string()?;

    let Some(sync_mode) = SyncMode::from_wire(mode) else {
        stream.write_result(ReturnCode::InvalidValue, &format!("Invalid sync mode {mode}"))?;
        return Ok(Disposition::Done);
    };
    if let Err(rc) = router.handles().update_timestamp(handle, pid) {
        stream.write_result(rc, &format!("Unable to update handle {handle} for process {pid}"))?;
        return Ok(Disposition::Done);
    }

    let handles = router.handles();
    let authentication = handles.authentication(handle);
    let mut request = ServiceRequest {
        sync_mode,
        handle,
        handle_name: handles.name(handle).unwrap_or_default(),
        service,
        request: text,
        authenticator: authentication.authenticator,
        user_id: authentication.user,
        auth_data: authentication.data,
        instance_uuid: router.identity().instance_uuid().to_owned(),
        machine_nickname: router.identity().nickname().to_owned(),
        is_local_request: true,
        request_pool: handles
            .variables(handle)
            .unwrap_or_else(|| Arc::new(VariablePool::new())),
        ..inbound(context)
    };
    request.endpoint = endpoint(&request);

    let resolved = router.resolve(&target, &[request.request_pool.as_ref()]);
    request.target_machine = resolved.trim().to_owned();
    request.request_number = router.requests().add(&request);
    debug!(
        target: DISPATCH_TARGET,
        handle,
        request_number = request.request_number,
        machine = %request.target_machine,
        service = %request.service,
        "local request"
    );

    let result = if is_local_target(&request.target_machine) {
        request.target_machine = router.identity().machine().to_owned();
        request.machine = router.identity().machine().to_owned();
        prepare(router, &mut request);
        submit_local(router, &mut request, Some(&mut *stream))?
    } else {
        submit_remote(router, &mut request, Some(&mut *stream))?
    };

    if sync_mode.is_sync() {
        return reply(stream, &result);
    }
    Ok(Disposition::from_shutdown(result.shutdown))
}

/// A request forwarded by a peer speaking the original framing.
///
/// No credentials travel with it, so the requester is anonymous and never
/// counts as local.
pub(super) fn remote_v1(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    let router = context.router;
    let nickname = stream.read_string()?;
    let handle = stream.read_uint()?;
    let handle_name = stream.read_string()?;
    let service = stream.read_string()?;
    let text = stream.read_string()?;

    let anonymous = Authentication::anonymous();
    let mut request = ServiceRequest {
        handle,
        handle_name,
        machine_nickname: nickname,
        service,
        request: text,
        authenticator: anonymous.authenticator,
        user_id: anonymous.user,
        request_pool: Arc::new(VariablePool::new()),
        ..inbound(context)
    };
    request.endpoint = endpoint(&request);
    request.instance_uuid.clone_from(&request.endpoint);

    prepare(router, &mut request);
    request.request_number = router.requests().add(&request);
    let result = submit_local(router, &mut request, None)?;
    reply(stream, &result)
}

/// A request forwarded with the caller's identity and variable pools.
pub(super) fn remote_v2(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    let router = context.router;
    let port = stream.read_string()?;
    let uuid = stream.read_string()?;
    let handle = stream.read_uint()?;
    let handle_name = stream.read_string()?;
    let service = stream.read_string()?;
    let text = stream.read_string()?;
    let mut identity = Authentication {
        authenticator: stream.read_string()?,
        user: stream.read_string()?,
        data: stream.read_string()?,
    };
    let nickname = stream.read_string()?;
    let request_pool = VariablePool::from_pairs(stream.read_pairs()?);
    let shared_pool = VariablePool::from_pairs(stream.read_pairs()?);

    let mut request = ServiceRequest {
        handle,
        handle_name,
        machine_nickname: nickname,
        service,
        request: text,
        port,
        request_pool: Arc::new(request_pool),
        source_shared_pool: Arc::new(shared_pool),
        ..inbound(context)
    };
    request.endpoint = endpoint(&request);
    request.is_local_request =
        same_host(context, &request.physical_id) && router.identity().is_self(&uuid);
    request.instance_uuid = uuid;

    if !identity.authenticator.eq_ignore_ascii_case(NO_AUTHENTICATOR) {
        let verdict = router.services().authenticators().authenticate_remote(
            &request.machine,
            handle,
            &mut identity,
        );
        if !verdict.is_ok() {
            debug!(
                target: DISPATCH_TARGET,
                machine = %request.machine,
                handle,
                rc = %verdict.rc,
                "remote authentication failed"
            );
            return reply(stream, &verdict);
        }
    }
    request.authenticator = identity.authenticator;
    request.user_id = identity.user;
    request.auth_data = identity.data;

    prepare(router, &mut request);
    request.request_number = router.requests().add(&request);
    let result = submit_local(router, &mut request, None)?;
    reply(stream, &result)
}

/// The peer's address is this host's.
fn same_host(context: &ApiContext<'_>, physical_id: &str) -> bool {
    physical_id == context.peer.provider.physical_id()
        || physical_id == LOOPBACK_V4
        || physical_id == LOOPBACK_V6
}
