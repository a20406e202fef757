//! Running service requests here or on another daemon.
//!
//! Both paths share the completion bookkeeping: the result is recorded in
//! the request manager, a completion message is queued to the caller's
//! handle when the sync mode asks for one, and the record is freed unless
//! the caller retains it for polling. Asynchronous callers get their request
//! number on the originating connection before the work starts.

mod remote;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use staf_proto::{ReturnCode, SyncMode, WireError, WriteWire};

use crate::connections::Link;
use crate::handles::DAEMON_HANDLE;
use crate::identity::{LOCAL_MACHINE, LOCAL_MACHINE_LONG, is_local_target};
use crate::router::Router;
use crate::services::{ServiceRequest, ServiceResult, wrap_data};
use crate::telemetry::{
    TRACE_ACCESS_DENIED, TRACE_REMOTE_REQUESTS, TRACE_SERVICE_ERRORS, TRACE_SERVICE_REQUESTS,
    TRACE_SERVICE_RESULTS,
};
use crate::transport::WireStream;
use crate::trust::TrustQuery;
use crate::variables::VariablePool;

pub(crate) use self::remote::forward;

pub(crate) const SUBMIT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::submit");

/// Message type of completion notices.
pub(crate) const REQUEST_COMPLETE: &str = "STAF/RequestComplete";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Completion<'a> {
    request_number: u32,
    rc: u32,
    result: &'a str,
}

/// Resolves the service name and trims the request text in place.
pub(crate) fn prepare(router: &Router, request: &mut ServiceRequest) {
    let pools: [&VariablePool; 2] = [&request.request_pool, &request.source_shared_pool];
    let service = router.resolve(&request.service, &pools);
    request.service = service.trim().to_owned();
    request.request = request.request.trim_start().to_owned();
}

/// Runs a tracked request against a service of this daemon.
///
/// `reply` is the caller's connection; an asynchronous caller receives its
/// request number there before the service runs.
pub(crate) fn submit_local(
    router: &Router,
    request: &mut ServiceRequest,
    reply: Option<&mut dyn WireStream>,
) -> Result<ServiceResult, WireError> {
    let service = router.services().get(&request.service);
    acknowledge(request, reply)?;
    info!(
        target: TRACE_SERVICE_REQUESTS,
        service = %request.service,
        request = %request.request,
        machine = %request.machine,
        handle = request.handle,
        request_number = request.request_number,
        "service request"
    );

    let result = match service {
        None => ServiceResult::error(ReturnCode::UnknownService, request.service.clone()),
        Some(service) => {
            request.trust_level = trust_level(router, request);
            catch_unwind(AssertUnwindSafe(|| service.accept(router, request))).unwrap_or_else(
                |_| {
                    error!(
                        target: SUBMIT_TARGET,
                        service = %request.service,
                        handle = request.handle,
                        request_number = request.request_number,
                        "service panicked"
                    );
                    ServiceResult::error(
                        ReturnCode::UnknownError,
                        format!("Caught unknown exception in the {} service", request.service),
                    )
                },
            )
        }
    };

    let length = u64::try_from(result.result.len()).unwrap_or(u64::MAX);
    if router.settings().result_is_large(length) {
        warn!(
            target: SUBMIT_TARGET,
            service = %request.service,
            rc = %result.rc,
            bytes = result.result.len(),
            machine = %request.machine,
            handle = request.handle,
            "result size is large"
        );
    }
    trace_outcome(request, &result, false);
    finish(router, request, &result);
    Ok(result)
}

/// Sends a tracked request to `request.target_machine`.
pub(crate) fn submit_remote(
    router: &Router,
    request: &mut ServiceRequest,
    reply: Option<&mut dyn WireStream>,
) -> Result<ServiceResult, WireError> {
    acknowledge(request, reply)?;
    info!(
        target: TRACE_REMOTE_REQUESTS,
        service = %request.service,
        machine = %request.target_machine,
        handle = request.handle,
        request_number = request.request_number,
        "forwarding request"
    );
    let machine = request.target_machine.clone();
    let mut connect = || {
        router
            .connections()
            .connect(&machine)
            .map(Link::from)
            .map_err(|error| ServiceResult::error(ReturnCode::NoPathToMachine, error.to_string()))
    };
    let result = forward(router, request, &mut connect);
    trace_outcome(request, &result, true);
    finish(router, request, &result);
    Ok(result)
}

/// Submits a synchronous request on behalf of the daemon's own handle.
pub(crate) fn submit_internal(
    router: &Router,
    machine: &str,
    service: &str,
    request: &str,
) -> ServiceResult {
    submit_as_daemon(router, machine, service, request, SyncMode::Sync)
}

fn submit_as_daemon(
    router: &Router,
    machine: &str,
    service: &str,
    text: &str,
    sync_mode: SyncMode,
) -> ServiceResult {
    let mut request = daemon_request(router, machine, service, text, sync_mode);
    request.request_number = router.requests().add(&request);
    let outcome = if is_local_target(machine) {
        request.target_machine = router.identity().machine().to_owned();
        prepare(router, &mut request);
        submit_local(router, &mut request, None)
    } else {
        submit_remote(router, &mut request, None)
    };
    outcome.unwrap_or_else(|error| {
        ServiceResult::error(ReturnCode::CommunicationError, error.to_string())
    })
}

fn daemon_request(
    router: &Router,
    machine: &str,
    service: &str,
    text: &str,
    sync_mode: SyncMode,
) -> ServiceRequest {
    let handles = router.handles();
    let authentication = handles.authentication(DAEMON_HANDLE);
    ServiceRequest {
        sync_mode,
        handle: DAEMON_HANDLE,
        handle_name: handles.name(DAEMON_HANDLE).unwrap_or_default(),
        machine: router.identity().machine().to_owned(),
        machine_nickname: router.identity().nickname().to_owned(),
        target_machine: machine.trim().to_owned(),
        service: service.to_owned(),
        request: text.to_owned(),
        interface: LOCAL_MACHINE.to_owned(),
        logical_id: LOCAL_MACHINE.to_owned(),
        physical_id: LOCAL_MACHINE.to_owned(),
        endpoint: LOCAL_MACHINE_LONG.to_owned(),
        authenticator: authentication.authenticator,
        user_id: authentication.user,
        auth_data: authentication.data,
        instance_uuid: router.identity().instance_uuid().to_owned(),
        is_local_request: true,
        request_pool: handles
            .variables(DAEMON_HANDLE)
            .unwrap_or_else(|| Arc::new(VariablePool::new())),
        ..ServiceRequest::default()
    }
}

/// Releases an asynchronous caller with its request number.
fn acknowledge(request: &ServiceRequest, reply: Option<&mut dyn WireStream>) -> Result<(), WireError> {
    match reply {
        Some(reply) if !request.sync_mode.is_sync() => {
            reply.write_result(ReturnCode::Ok, &request.request_number.to_string())
        }
        _ => Ok(()),
    }
}

fn trust_level(router: &Router, request: &ServiceRequest) -> u32 {
    let query = if request.is_local_request {
        TrustQuery::local(&request.authenticator, &request.user_id)
    } else {
        TrustQuery {
            interface: &request.interface,
            logical_id: &request.logical_id,
            physical_id: &request.physical_id,
            authenticator: &request.authenticator,
            user_id: &request.user_id,
        }
    };
    router.trust().trust_level(&query)
}

/// Records completion, queues the notice and frees the record.
fn finish(router: &Router, request: &ServiceRequest, result: &ServiceResult) {
    let number = request.request_number;
    router.requests().complete(number, result);
    if request.sync_mode.queues_completion() {
        queue_completion(router, request, result);
    }
    if !request.sync_mode.retains_result() {
        if let Err(rc) = router.requests().free(number) {
            warn!(
                target: SUBMIT_TARGET,
                request_number = number,
                rc = %rc,
                "request record could not be freed"
            );
        }
    }
}

fn queue_completion(router: &Router, request: &ServiceRequest, result: &ServiceResult) {
    let notice = Completion {
        request_number: request.request_number,
        rc: result.rc.code(),
        result: &result.result,
    };
    let message = match serde_json::to_string(&notice) {
        Ok(message) => message,
        Err(error) => {
            error!(target: SUBMIT_TARGET, %error, "completion notice not serialisable");
            return;
        }
    };
    let queue_request = format!(
        "QUEUE HANDLE {} TYPE {REQUEST_COMPLETE} MESSAGE {}",
        request.handle,
        wrap_data(&message)
    );
    submit_as_daemon(
        router,
        LOCAL_MACHINE,
        "QUEUE",
        &queue_request,
        SyncMode::FireAndForget,
    );
}

fn trace_outcome(request: &ServiceRequest, result: &ServiceResult, remote: bool) {
    if result.rc == ReturnCode::AccessDenied {
        warn!(
            target: TRACE_ACCESS_DENIED,
            remote,
            service = %request.service,
            machine = %request.target_machine,
            handle = request.handle,
            request_number = request.request_number,
            "service request denied"
        );
    } else if !result.is_ok() {
        warn!(
            target: TRACE_SERVICE_ERRORS,
            remote,
            rc = %result.rc,
            service = %request.service,
            machine = %request.target_machine,
            handle = request.handle,
            request_number = request.request_number,
            result = %result.result,
            "service request returned error"
        );
    } else {
        info!(
            target: TRACE_SERVICE_RESULTS,
            remote,
            service = %request.service,
            machine = %request.target_machine,
            handle = request.handle,
            request_number = request.request_number,
            result_len = result.result.len(),
            "service request complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use staf_proto::ReadWire;

    use super::*;
    use crate::copy::test_support::Duplex;
    use crate::requests::RequestState;
    use crate::router::test_support::router;

    #[fixture]
    fn local_request() -> ServiceRequest {
        ServiceRequest {
            handle: DAEMON_HANDLE,
            service: "PING".to_owned(),
            request: "PING".to_owned(),
            interface: LOCAL_MACHINE.to_owned(),
            is_local_request: true,
            ..ServiceRequest::default()
        }
    }

    fn tracked(router: &Router, mut request: ServiceRequest, mode: SyncMode) -> ServiceRequest {
        request.sync_mode = mode;
        request.request_number = router.requests().add(&request);
        request
    }

    #[rstest]
    fn synchronous_requests_are_freed_after_completion(local_request: ServiceRequest) {
        let router = router(5);
        let mut request = tracked(&router, local_request, SyncMode::Sync);
        let mut reply = Duplex::replying(Vec::new());
        let result = submit_local(&router, &mut request, Some(&mut reply)).expect("wire");
        assert_eq!(result, ServiceResult::ok("PONG"));
        assert!(reply.outbound.is_empty());
        assert_eq!(router.requests().status(request.request_number), None);
    }

    #[rstest]
    fn untracked_requests_complete_without_a_record(mut local_request: ServiceRequest) {
        let router = router(5);
        local_request.request_number = 9999;
        let result = submit_local(&router, &mut local_request, None).expect("wire");
        assert_eq!(result, ServiceResult::ok("PONG"));
        assert_eq!(router.requests().status(9999), None);
        assert_eq!(
            router.requests().free(9999),
            Err(ReturnCode::RequestNumberNotFound)
        );
    }

    #[rstest]
    fn unknown_services_still_complete_their_bookkeeping(mut local_request: ServiceRequest) {
        let router = router(5);
        local_request.service = "NOSUCH".to_owned();
        let mut request = tracked(&router, local_request, SyncMode::Sync);
        let result = submit_local(&router, &mut request, None).expect("wire");
        assert_eq!(result.rc, ReturnCode::UnknownService);
        assert_eq!(result.result, "NOSUCH");
        assert!(router.requests().snapshot().is_empty());
    }

    #[rstest]
    fn retained_requests_answer_with_their_number_first(local_request: ServiceRequest) {
        let router = router(5);
        let mut request = tracked(&router, local_request, SyncMode::Retain);
        let mut reply = Duplex::replying(Vec::new());
        submit_local(&router, &mut request, Some(&mut reply)).expect("wire");

        let mut written = reply.written();
        assert_eq!(written.read_rc().expect("rc"), ReturnCode::Ok);
        assert_eq!(
            written.read_string().expect("number"),
            request.request_number.to_string()
        );
        assert_eq!(
            router.requests().status(request.request_number),
            Some(RequestState::Complete)
        );
        assert_eq!(
            router.requests().free(request.request_number),
            Ok(ServiceResult::ok("PONG"))
        );
    }

    #[rstest]
    fn queued_requests_deliver_a_completion_notice(local_request: ServiceRequest) {
        let router = router(5);
        let handle = router.handles().register(4242, "client").expect("handle");
        let request = ServiceRequest {
            handle,
            ..local_request
        };
        let mut request = tracked(&router, request, SyncMode::Queue);
        submit_local(&router, &mut request, None).expect("wire");

        let notice = router
            .handles()
            .dequeue(handle, Some(REQUEST_COMPLETE))
            .expect("handle")
            .expect("notice");
        let body: serde_json::Value = serde_json::from_str(&notice.message).expect("json");
        assert_eq!(body["requestNumber"], request.request_number);
        assert_eq!(body["rc"], 0);
        assert_eq!(body["result"], "PONG");
        assert!(router.requests().snapshot().is_empty());
    }

    #[rstest]
    fn local_origin_requests_are_trusted_as_the_local_machine(mut local_request: ServiceRequest) {
        let router = router(2);
        router.trust().set_machine("local://local", 5);
        local_request.service = "TRUST".to_owned();
        local_request.request = "SET DEFAULT LEVEL 4".to_owned();
        let mut request = tracked(&router, local_request, SyncMode::Sync);
        let result = submit_local(&router, &mut request, None).expect("wire");
        assert!(result.is_ok(), "{result}");
        assert_eq!(request.trust_level, 5);
    }

    #[rstest]
    fn service_names_resolve_through_request_pools() {
        let router = router(5);
        let pool = VariablePool::new();
        pool.set("svc", "ping");
        let mut request = ServiceRequest {
            service: "{svc}".to_owned(),
            request: "   PING".to_owned(),
            request_pool: Arc::new(pool),
            ..ServiceRequest::default()
        };
        prepare(&router, &mut request);
        assert_eq!(request.service, "ping");
        assert_eq!(request.request, "PING");
    }

    #[rstest]
    fn internal_requests_run_as_the_daemon_handle() {
        let router = router(5);
        let result = submit_internal(&router, "local", "MISC", "WHOAMI");
        assert!(result.is_ok(), "{result}");
        let whoami: serde_json::Value = serde_json::from_str(&result.result).expect("json");
        assert_eq!(whoami["isLocalRequest"], "Yes");
        assert_eq!(whoami["handle"], DAEMON_HANDLE);
    }
}
