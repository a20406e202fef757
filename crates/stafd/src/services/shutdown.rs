//! Operator request to stop the daemon.

use tracing::warn;

use super::{
    OptionParser, SERVICE_TARGET, Service, ServiceRequest, ServiceResult, unknown_command,
};
use crate::router::Router;

pub(crate) struct ShutdownService;

impl Service for ShutdownService {
    fn name(&self) -> &str {
        "SHUTDOWN"
    }

    /// Flags the result; the dispatcher stops the daemon once it has replied.
    fn accept(&self, _router: &Router, request: &ServiceRequest) -> ServiceResult {
        match OptionParser::new().flag("SHUTDOWN").parse(&request.request) {
            Ok(parsed) if parsed.has("SHUTDOWN") => {}
            Ok(_) => return unknown_command(request),
            Err(refused) => return refused,
        }
        if let Err(denied) = request.require_trust(4, "SHUTDOWN") {
            return denied;
        }
        warn!(
            target: SERVICE_TARGET,
            machine = %request.endpoint,
            handle = request.handle,
            user = %request.user(),
            "shutdown requested"
        );
        ServiceResult::shutdown()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use staf_proto::ReturnCode;

    use super::*;
    use crate::router::test_support::router;

    fn request(trust_level: u32) -> ServiceRequest {
        ServiceRequest {
            service: "SHUTDOWN".to_owned(),
            request: "SHUTDOWN".to_owned(),
            trust_level,
            ..ServiceRequest::default()
        }
    }

    #[rstest]
    fn trusted_callers_flag_shutdown() {
        let result = ShutdownService.accept(&router(5), &request(4));
        assert!(result.is_ok());
        assert!(result.shutdown);
    }

    #[rstest]
    fn untrusted_callers_are_denied() {
        let result = ShutdownService.accept(&router(5), &request(3));
        assert_eq!(result.rc, ReturnCode::AccessDenied);
        assert!(!result.shutdown);
    }
}
