//! A service name answered by another daemon.

use staf_proto::ReturnCode;

use super::{Service, ServiceRequest, ServiceResult};
use crate::connections::Link;
use crate::router::Router;
use crate::submit::forward;

pub(crate) struct DelegatedService {
    name: String,
    machine: String,
    target_service: String,
}

impl DelegatedService {
    pub(crate) fn new(
        name: impl Into<String>,
        machine: impl Into<String>,
        target_service: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            machine: machine.into(),
            target_service: target_service.into(),
        }
    }

    fn retarget(&self, request: &ServiceRequest) -> ServiceRequest {
        ServiceRequest {
            target_machine: self.machine.clone(),
            service: self.target_service.clone(),
            ..request.clone()
        }
    }
}

impl Service for DelegatedService {
    fn name(&self) -> &str {
        &self.name
    }

    fn accept(&self, router: &Router, request: &ServiceRequest) -> ServiceResult {
        let forwarded = self.retarget(request);
        let mut connect = || {
            router
                .connections()
                .connect(&self.machine)
                .map(Link::from)
                .map_err(|error| ServiceResult::error(ReturnCode::NoPathToMachine, error.to_string()))
        };
        forward(router, &forwarded, &mut connect)
    }
}
