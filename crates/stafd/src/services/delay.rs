//! Sleeps for a while before answering. Useful for exercising the
//! asynchronous sync modes.

use std::thread;
use std::time::Duration;

use staf_proto::ReturnCode;

use super::{OptionParser, Service, ServiceRequest, ServiceResult};
use crate::router::Router;

pub(crate) struct DelayService;

impl Service for DelayService {
    fn name(&self) -> &str {
        "DELAY"
    }

    fn accept(&self, _router: &Router, request: &ServiceRequest) -> ServiceResult {
        let parsed = match OptionParser::new().value("DELAY").parse(&request.request) {
            Ok(parsed) => parsed,
            Err(refused) => return refused,
        };
        if let Err(denied) = request.require_trust(2, "DELAY") {
            return denied;
        }
        match parsed.number::<u64>("DELAY") {
            Ok(Some(millis)) => {
                thread::sleep(Duration::from_millis(millis));
                ServiceResult::ok("")
            }
            Ok(None) => ServiceResult::error(
                ReturnCode::InvalidRequestString,
                "Option DELAY requires a value",
            ),
            Err(invalid) => invalid,
        }
    }
}
