//! Introspection and runtime settings.
//!
//! `WHOAMI` echoes how this daemon sees the requester, including whether the
//! request came from this very instance. `LIST` and `PURGE` expose the
//! interfaces and the endpoint cache. `SET` changes operational settings
//! without a restart.

use serde::Serialize;
use tracing::info;

use staf_proto::ReturnCode;

use super::{
    OptionParser, ParsedRequest, SERVICE_TARGET, Service, ServiceRequest, ServiceResult,
    unknown_command,
};
use crate::router::Router;

pub(crate) struct MiscService;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WhoAmI<'a> {
    instance_uuid: &'a str,
    machine: &'a str,
    machine_nickname: &'a str,
    handle: u32,
    handle_name: &'a str,
    user: String,
    trust_level: u32,
    endpoint: &'a str,
    interface: &'a str,
    logical_id: &'a str,
    physical_id: &'a str,
    is_local_request: &'static str,
    request_number: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Purged {
    purged: usize,
    remaining: usize,
}

fn parser() -> OptionParser {
    OptionParser::new()
        .flag("WHOAMI")
        .flag("LIST")
        .flag("INTERFACES")
        .flag("ENDPOINTCACHE")
        .flag("SETTINGS")
        .flag("SERVICES")
        .flag("PURGE")
        .repeated("ENDPOINT")
        .flag("SET")
        .value("DEFAULTINTERFACE")
        .value("INTERFACECYCLING")
        .value("CONNECTATTEMPTS")
        .value("RESULTWARNINGSIZE")
        .value("STRICTFSCOPYTRUST")
}

impl Service for MiscService {
    fn name(&self) -> &str {
        "MISC"
    }

    fn accept(&self, router: &Router, request: &ServiceRequest) -> ServiceResult {
        let parsed = match parser().parse(&request.request) {
            Ok(parsed) => parsed,
            Err(refused) => return refused,
        };
        let outcome = match parsed.command() {
            Some("WHOAMI") => who_am_i(router, request),
            Some("LIST") => list(router, request, &parsed),
            Some("PURGE") => purge(router, request, &parsed),
            Some("SET") => set(router, request, &parsed),
            _ => Err(unknown_command(request)),
        };
        outcome.unwrap_or_else(|error| error)
    }
}

fn who_am_i(router: &Router, request: &ServiceRequest) -> Result<ServiceResult, ServiceResult> {
    request.require_trust(1, "WHOAMI")?;
    Ok(ServiceResult::json(&WhoAmI {
        instance_uuid: router.identity().instance_uuid(),
        machine: &request.machine,
        machine_nickname: &request.machine_nickname,
        handle: request.handle,
        handle_name: &request.handle_name,
        user: request.user(),
        trust_level: request.trust_level,
        endpoint: &request.endpoint,
        interface: &request.interface,
        logical_id: &request.logical_id,
        physical_id: &request.physical_id,
        is_local_request: if request.is_local_request { "Yes" } else { "No" },
        request_number: request.request_number,
    }))
}

fn list(
    router: &Router,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    parsed.exclusive(&["INTERFACES", "ENDPOINTCACHE", "SETTINGS", "SERVICES"])?;
    request.require_trust(2, "LIST")?;
    if parsed.has("INTERFACES") {
        Ok(ServiceResult::json(&router.connections().summaries()))
    } else if parsed.has("ENDPOINTCACHE") {
        Ok(ServiceResult::json(&router.connections().endpoint_cache()))
    } else if parsed.has("SETTINGS") {
        Ok(ServiceResult::json(&router.settings().snapshot()))
    } else if parsed.has("SERVICES") {
        Ok(ServiceResult::json(&router.services().names()))
    } else {
        Err(ServiceResult::error(
            ReturnCode::InvalidRequestString,
            "LIST requires INTERFACES, ENDPOINTCACHE, SETTINGS or SERVICES",
        ))
    }
}

fn purge(
    router: &Router,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    if !parsed.has("ENDPOINTCACHE") {
        return Err(ServiceResult::error(
            ReturnCode::InvalidRequestString,
            "PURGE requires ENDPOINTCACHE",
        ));
    }
    request.require_trust(4, "PURGE")?;
    let connections = router.connections();
    let endpoints = parsed.values("ENDPOINT");
    let purged = if endpoints.is_empty() {
        connections.purge_cache()
    } else {
        endpoints
            .iter()
            .filter(|endpoint| connections.remove_cached(endpoint))
            .count()
    };
    let remaining = connections.endpoint_cache().len();
    info!(target: SERVICE_TARGET, purged, remaining, "endpoint cache purged");
    Ok(ServiceResult::json(&Purged { purged, remaining }))
}

fn set(
    router: &Router,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    request.require_trust(5, "SET")?;
    let settings = router.settings();

    if let Some(name) = parsed.value("DEFAULTINTERFACE") {
        router
            .connections()
            .set_default_interface(name)
            .map_err(|error| ServiceResult::error(error.rc(), error.to_string()))?;
    }
    if let Some(value) = parsed.value("INTERFACECYCLING") {
        router.connections().set_cycling(enabled(value, "INTERFACECYCLING")?);
    }
    if let Some(attempts) = parsed.number::<u32>("CONNECTATTEMPTS")?
        && !settings.set_connect_attempts(attempts)
    {
        return Err(ServiceResult::error(
            ReturnCode::InvalidValue,
            "CONNECTATTEMPTS must be at least 1",
        ));
    }
    if let Some(size) = parsed.number::<u32>("RESULTWARNINGSIZE")? {
        settings.set_result_warning_size(size);
    }
    if let Some(value) = parsed.value("STRICTFSCOPYTRUST") {
        settings.set_strict_fs_copy_trust(enabled(value, "STRICTFSCOPYTRUST")?);
    }
    info!(
        target: SERVICE_TARGET,
        user = %request.user(),
        machine = %request.endpoint,
        "settings changed"
    );
    Ok(ServiceResult::ok(""))
}

fn enabled(value: &str, option: &str) -> Result<bool, ServiceResult> {
    if value.eq_ignore_ascii_case("enabled") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("disabled") {
        Ok(false)
    } else {
        Err(ServiceResult::error(
            ReturnCode::InvalidValue,
            format!("{option} must be Enabled or Disabled, not {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::router::test_support::router;

    #[fixture]
    fn admin() -> ServiceRequest {
        ServiceRequest {
            service: "MISC".to_owned(),
            handle: 12,
            handle_name: "admin".to_owned(),
            authenticator: "none".to_owned(),
            user_id: "anonymous".to_owned(),
            trust_level: 5,
            ..ServiceRequest::default()
        }
    }

    fn run(router: &Router, request: &ServiceRequest, text: &str) -> ServiceResult {
        let request = ServiceRequest {
            request: text.to_owned(),
            ..request.clone()
        };
        MiscService.accept(router, &request)
    }

    #[rstest]
    fn whoami_reports_locality_and_identity(admin: ServiceRequest) {
        let router = router(5);
        let local = ServiceRequest {
            is_local_request: true,
            ..admin
        };
        let result = run(&router, &local, "WHOAMI");
        let value: serde_json::Value = serde_json::from_str(&result.result).expect("json");
        assert_eq!(value["isLocalRequest"], "Yes");
        assert_eq!(value["handle"], 12);
        assert_eq!(value["trustLevel"], 5);
        assert_eq!(value["user"], "none://anonymous");
        assert_eq!(value["instanceUuid"], router.identity().instance_uuid());
    }

    #[rstest]
    fn settings_change_at_runtime(admin: ServiceRequest) {
        let router = router(5);
        let result = run(
            &router,
            &admin,
            "SET CONNECTATTEMPTS 7 RESULTWARNINGSIZE 128 INTERFACECYCLING disabled",
        );
        assert!(result.is_ok(), "{result}");
        assert_eq!(router.settings().connect_attempts(), 7);
        assert_eq!(router.settings().result_warning_size(), 128);
        assert!(!router.connections().cycling());

        let listed = run(&router, &admin, "LIST SETTINGS");
        let value: serde_json::Value = serde_json::from_str(&listed.result).expect("json");
        assert_eq!(value["connectAttempts"], 7);
    }

    #[rstest]
    #[case("SET CONNECTATTEMPTS 0", ReturnCode::InvalidValue)]
    #[case("SET INTERFACECYCLING sometimes", ReturnCode::InvalidValue)]
    #[case("SET DEFAULTINTERFACE nowhere", ReturnCode::DoesNotExist)]
    #[case("LIST SETTINGS INTERFACES", ReturnCode::InvalidRequestString)]
    #[case("PURGE", ReturnCode::InvalidRequestString)]
    #[case("FROB", ReturnCode::InvalidRequestString)]
    fn invalid_requests_are_rejected(
        admin: ServiceRequest,
        #[case] text: &str,
        #[case] expected: ReturnCode,
    ) {
        assert_eq!(run(&router(5), &admin, text).rc, expected);
    }

    #[rstest]
    fn settings_require_full_trust(admin: ServiceRequest) {
        let operator = ServiceRequest {
            trust_level: 4,
            ..admin
        };
        let result = run(&router(5), &operator, "SET RESULTWARNINGSIZE 1");
        assert_eq!(result.rc, ReturnCode::AccessDenied);
    }

    #[rstest]
    fn purging_an_empty_cache_reports_nothing(admin: ServiceRequest) {
        let result = run(&router(5), &admin, "PURGE ENDPOINTCACHE ENDPOINT tcp://gone");
        let value: serde_json::Value = serde_json::from_str(&result.result).expect("json");
        assert_eq!(value["purged"], 0);
        assert_eq!(value["remaining"], 0);
    }

    #[rstest]
    fn interfaces_include_the_local_provider(admin: ServiceRequest) {
        let result = run(&router(5), &admin, "LIST INTERFACES");
        let value: serde_json::Value = serde_json::from_str(&result.result).expect("json");
        let names: Vec<&str> = value
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|row| row["name"].as_str())
            .collect();
        assert!(names.contains(&"local"));
    }
}
