//! Connections opened by the sending side of a copy.

use staf_proto::{ReturnCode, WireError};

use super::transfer::CopyFault;
use crate::connections::Link;
use crate::endpoint::{SPEC_SEPARATOR, split_port, split_specification};
use crate::identity::{LOCAL_MACHINE, is_local_target};
use crate::router::Router;
use crate::services::{ServiceRequest, ServiceResult};

/// Machine name a copy connects to.
///
/// Without interface cycling a bare machine name is routed through the
/// interface the request arrived on.
pub(crate) fn target_machine(router: &Router, request: &ServiceRequest, to_machine: &str) -> String {
    if router.connections().cycling()
        || is_local_target(to_machine)
        || to_machine.contains(SPEC_SEPARATOR)
        || split_port(to_machine).1.is_some()
    {
        return to_machine.to_owned();
    }
    match split_specification(&request.endpoint) {
        (Some(interface), _) if !interface.eq_ignore_ascii_case(LOCAL_MACHINE) => {
            format!("{interface}{SPEC_SEPARATOR}{to_machine}")
        }
        _ => to_machine.to_owned(),
    }
}

/// Connects to `machine`, retrying once on the requester's port when the
/// machine names none.
pub(crate) fn dial(router: &Router, request: &ServiceRequest, machine: &str) -> Result<Link, ServiceResult> {
    let first = match router.connections().connect(machine) {
        Ok(route) => return Ok(route.into()),
        Err(error) => ServiceResult::error(ReturnCode::NoPathToMachine, error.to_string()),
    };
    let (_, host) = split_specification(machine);
    let (_, requester) = split_specification(&request.endpoint);
    match (split_port(host).1, split_port(requester).1) {
        (None, Some(port)) => router
            .connections()
            .connect(&format!("{machine}:{port}"))
            .map(Link::from)
            .map_err(|_| first),
        _ => Err(first),
    }
}

pub(crate) fn wire_failure(error: &WireError) -> ServiceResult {
    ServiceResult::error(ReturnCode::CommunicationError, error.to_string())
}

pub(crate) fn fault_result(fault: &CopyFault, name: &str) -> ServiceResult {
    match fault {
        CopyFault::Wire(error) => wire_failure(error),
        CopyFault::Source(error) => ServiceResult::error(
            ReturnCode::FileReadError,
            format!("Unrecoverable read error occurred while copying file {name}: {error}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::router::test_support::router;

    fn request_from(endpoint: &str) -> ServiceRequest {
        ServiceRequest {
            endpoint: endpoint.to_owned(),
            ..ServiceRequest::default()
        }
    }

    #[rstest]
    #[case(true, "peer", "peer")]
    #[case(false, "peer", "ssl://peer")]
    #[case(false, "tcp://peer", "tcp://peer")]
    #[case(false, "local", "local")]
    #[case(false, "peer:7000", "peer:7000")]
    fn bare_machines_follow_the_requesting_interface(
        #[case] cycling: bool,
        #[case] to_machine: &str,
        #[case] expected: &str,
    ) {
        let router = router(5);
        router.connections().set_cycling(cycling);
        let request = request_from("ssl://client.example.com:6550");
        assert_eq!(target_machine(&router, &request, to_machine), expected);
    }

    #[rstest]
    fn local_requesters_do_not_pin_an_interface() {
        let router = router(5);
        router.connections().set_cycling(false);
        let request = request_from("local://local");
        assert_eq!(target_machine(&router, &request, "peer"), "peer");
    }
}
