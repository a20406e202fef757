//! Per-handle message queues.
//!
//! Completion notices for `Queue` sync modes arrive here as ordinary
//! `QUEUE` requests from the daemon's own handle.

use staf_proto::ReturnCode;

use super::{OptionParser, ParsedRequest, Service, ServiceRequest, ServiceResult, unknown_command};
use crate::handles::QueuedMessage;
use crate::router::Router;

pub(crate) struct QueueService;

fn parser() -> OptionParser {
    OptionParser::new()
        .flag("QUEUE")
        .flag("GET")
        .value("HANDLE")
        .value("TYPE")
        .value("MESSAGE")
}

impl Service for QueueService {
    fn name(&self) -> &str {
        "QUEUE"
    }

    fn accept(&self, router: &Router, request: &ServiceRequest) -> ServiceResult {
        let parsed = match parser().parse(&request.request) {
            Ok(parsed) => parsed,
            Err(refused) => return refused,
        };
        let outcome = match parsed.command() {
            Some("QUEUE") => queue(router, request, &parsed),
            Some("GET") => get(router, request, &parsed),
            _ => Err(unknown_command(request)),
        };
        outcome.unwrap_or_else(|error| error)
    }
}

fn queue(
    router: &Router,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    let handle = parsed.number::<u32>("HANDLE")?;
    let (Some(handle), Some(message)) = (handle, parsed.value("MESSAGE")) else {
        return Err(ServiceResult::error(
            ReturnCode::InvalidRequestString,
            "QUEUE requires HANDLE and MESSAGE",
        ));
    };
    request.require_trust(3, "QUEUE")?;
    let rc = router.handles().queue(
        handle,
        QueuedMessage {
            machine: request.machine.clone(),
            handle_name: request.handle_name.clone(),
            handle: request.handle,
            kind: parsed.value("TYPE").unwrap_or_default().to_owned(),
            message: message.to_owned(),
        },
    );
    if rc.is_ok() {
        Ok(ServiceResult::ok(""))
    } else {
        Err(ServiceResult::error(rc, handle.to_string()))
    }
}

/// Removes the oldest message, optionally of one type, from a handle's
/// queue. Without `HANDLE` the requester's own queue is read.
fn get(
    router: &Router,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    request.require_trust(2, "GET")?;
    let handle = parsed.number::<u32>("HANDLE")?.unwrap_or(request.handle);
    match router.handles().dequeue(handle, parsed.value("TYPE")) {
        Ok(Some(message)) => Ok(ServiceResult::json(&message)),
        Ok(None) => Err(ServiceResult::error(ReturnCode::NoQueueElement, "")),
        Err(rc) => Err(ServiceResult::error(rc, handle.to_string())),
    }
}
