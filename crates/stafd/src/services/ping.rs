//! Liveness check.

use super::{OptionParser, Service, ServiceRequest, ServiceResult, unknown_command};
use crate::router::Router;

pub(crate) struct PingService;

impl Service for PingService {
    fn name(&self) -> &str {
        "PING"
    }

    fn accept(&self, _router: &Router, request: &ServiceRequest) -> ServiceResult {
        match OptionParser::new().flag("PING").parse(&request.request) {
            Ok(parsed) if parsed.has("PING") => {}
            Ok(_) => return unknown_command(request),
            Err(refused) => return refused,
        }
        if let Err(denied) = request.require_trust(1, "PING") {
            return denied;
        }
        ServiceResult::ok("PONG")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use staf_proto::ReturnCode;

    use super::*;
    use crate::router::test_support::router;

    #[rstest]
    #[case("PING", 1, ReturnCode::Ok)]
    #[case("ping", 5, ReturnCode::Ok)]
    #[case("PING", 0, ReturnCode::AccessDenied)]
    #[case("PING EXTRA", 5, ReturnCode::InvalidRequestString)]
    #[case("", 5, ReturnCode::InvalidRequestString)]
    fn answers_pong_to_trusted_callers(
        #[case] text: &str,
        #[case] trust_level: u32,
        #[case] expected: ReturnCode,
    ) {
        let request = ServiceRequest {
            service: "PING".to_owned(),
            request: text.to_owned(),
            trust_level,
            ..ServiceRequest::default()
        };
        let result = PingService.accept(&router(5), &request);
        assert_eq!(result.rc, expected);
        if expected.is_ok() {
            assert_eq!(result.result, "PONG");
        }
    }
}
