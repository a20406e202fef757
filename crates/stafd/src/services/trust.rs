//! Operator access to the trust tables.

use serde::Serialize;
use tracing::info;

use staf_proto::ReturnCode;

use super::{
    OptionParser, ParsedRequest, SERVICE_TARGET, Service, ServiceRequest, ServiceResult,
    unknown_command,
};
use crate::router::Router;
use crate::trust::TrustManager;

pub(crate) struct TrustService;

/// One row of `TRUST LIST`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrustEntry {
    #[serde(rename = "type")]
    kind: &'static str,
    entry: Option<String>,
    level: u32,
}

fn parser() -> OptionParser {
    OptionParser::new()
        .flag("SET")
        .flag("DELETE")
        .flag("GET")
        .flag("LIST")
        .value("MACHINE")
        .value("USER")
        .flag("DEFAULT")
        .value("LEVEL")
}

impl Service for TrustService {
    fn name(&self) -> &str {
        "TRUST"
    }

    fn accept(&self, router: &Router, request: &ServiceRequest) -> ServiceResult {
        let parsed = match parser().parse(&request.request) {
            Ok(parsed) => parsed,
            Err(refused) => return refused,
        };
        let trust = router.trust();
        let outcome = match parsed.command() {
            Some("SET") => set(trust, request, &parsed),
            Some("DELETE") => delete(trust, request, &parsed),
            Some("GET") => get(trust, request, &parsed),
            Some("LIST") => list(trust, request),
            _ => Err(unknown_command(request)),
        };
        outcome.unwrap_or_else(|error| error)
    }
}

fn from_rc(rc: ReturnCode, trustee: &str) -> Result<ServiceResult, ServiceResult> {
    if rc.is_ok() {
        Ok(ServiceResult::ok(""))
    } else {
        Err(ServiceResult::error(rc, trustee))
    }
}

fn set(
    trust: &TrustManager,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    parsed.exclusive(&["MACHINE", "USER", "DEFAULT"])?;
    let Some(level) = parsed.number::<u32>("LEVEL")? else {
        return Err(ServiceResult::error(
            ReturnCode::InvalidRequestString,
            "SET requires LEVEL",
        ));
    };
    request.require_trust(5, "SET")?;
    let (rc, trustee) = if let Some(machine) = parsed.value("MACHINE") {
        (trust.set_machine(machine, level), machine)
    } else if let Some(user) = parsed.value("USER") {
        (trust.set_user(user, level), user)
    } else if parsed.has("DEFAULT") {
        (trust.set_default(level), "DEFAULT")
    } else {
        return Err(ServiceResult::error(
            ReturnCode::InvalidRequestString,
            "SET requires MACHINE, USER or DEFAULT",
        ));
    };
    if rc.is_ok() {
        info!(
            target: SERVICE_TARGET,
            trustee,
            level,
            user = %request.user(),
            machine = %request.endpoint,
            "trust level set"
        );
    }
    from_rc(rc, &format!("Invalid trust level {level} for {trustee}"))
}

fn delete(
    trust: &TrustManager,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    parsed.exclusive(&["MACHINE", "USER"])?;
    request.require_trust(5, "DELETE")?;
    let (rc, trustee) = if let Some(machine) = parsed.value("MACHINE") {
        (trust.delete_machine(machine), machine)
    } else if let Some(user) = parsed.value("USER") {
        (trust.delete_user(user), user)
    } else {
        return Err(ServiceResult::error(
            ReturnCode::InvalidRequestString,
            "DELETE requires MACHINE or USER",
        ));
    };
    info!(target: SERVICE_TARGET, trustee, rc = %rc, "trust entry deleted");
    from_rc(rc, trustee)
}

fn get(
    trust: &TrustManager,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    let Some(machine) = parsed.value("MACHINE") else {
        return Err(ServiceResult::error(
            ReturnCode::InvalidRequestString,
            "GET requires MACHINE",
        ));
    };
    request.require_trust(2, "GET")?;
    let level = match parsed.value("USER") {
        Some(user) => trust.trust_for(machine, user),
        None => trust.trust_for_machine(machine),
    };
    Ok(ServiceResult::ok(level.to_string()))
}

fn list(trust: &TrustManager, request: &ServiceRequest) -> Result<ServiceResult, ServiceResult> {
    request.require_trust(2, "LIST")?;
    let mut entries = vec![TrustEntry {
        kind: "Default",
        entry: None,
        level: trust.default_level(),
    }];
    let machines = trust.machine_rules().into_iter().map(|rule| TrustEntry {
        kind: "Machine",
        entry: Some(rule.spec()),
        level: rule.level,
    });
    let users = trust.user_rules().into_iter().map(|rule| TrustEntry {
        kind: "User",
        entry: Some(rule.spec()),
        level: rule.level,
    });
    entries.extend(machines.chain(users));
    Ok(ServiceResult::json(&entries))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::router::test_support::router;

    fn run(router: &Router, trust_level: u32, text: &str) -> ServiceResult {
        let request = ServiceRequest {
            service: "TRUST".to_owned(),
            request: text.to_owned(),
            trust_level,
            ..ServiceRequest::default()
        };
        TrustService.accept(router, &request)
    }

    #[rstest]
    fn machine_rules_are_set_queried_and_deleted() {
        let router = router(3);
        assert!(run(&router, 5, "SET MACHINE tcp://build* LEVEL 4").is_ok());
        assert_eq!(run(&router, 5, "GET MACHINE tcp://build01").result, "4");
        assert_eq!(run(&router, 5, "GET MACHINE tcp://other").result, "3");
        assert!(run(&router, 5, "DELETE MACHINE tcp://build*").is_ok());
        assert_eq!(
            run(&router, 5, "DELETE MACHINE tcp://build*").rc,
            ReturnCode::TrusteeDoesNotExist
        );
    }

    #[rstest]
    fn default_level_is_listed_first() {
        let router = router(3);
        assert!(run(&router, 5, "SET DEFAULT LEVEL 2").is_ok());
        assert!(run(&router, 5, "SET USER none://ops LEVEL 5").is_ok());
        let listed = run(&router, 2, "LIST");
        let rows: serde_json::Value = serde_json::from_str(&listed.result).expect("json");
        assert_eq!(rows[0]["type"], "Default");
        assert_eq!(rows[0]["level"], 2);
        assert_eq!(rows[1]["type"], "User");
        assert_eq!(rows[1]["level"], 5);
    }

    #[rstest]
    #[case(4, "SET DEFAULT LEVEL 1", ReturnCode::AccessDenied)]
    #[case(5, "SET DEFAULT LEVEL 9", ReturnCode::InvalidTrustLevel)]
    #[case(5, "SET MACHINE a USER b LEVEL 1", ReturnCode::InvalidRequestString)]
    #[case(5, "SET MACHINE a", ReturnCode::InvalidRequestString)]
    #[case(5, "GET USER a", ReturnCode::InvalidRequestString)]
    #[case(1, "LIST", ReturnCode::AccessDenied)]
    fn invalid_or_unauthorised_requests_fail(
        #[case] trust_level: u32,
        #[case] text: &str,
        #[case] expected: ReturnCode,
    ) {
        assert_eq!(run(&router(3), trust_level, text).rc, expected);
    }
}
