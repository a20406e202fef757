//! File system service: the sending side of copies and the copy listing.

use std::path::{Path, PathBuf};

use staf_proto::ReturnCode;
use staf_proto::copy::{CopyFlags, EntryKind};

use super::{OptionParser, ParsedRequest, Service, ServiceRequest, ServiceResult, unknown_command};
use crate::copy::{CopySummary, Direction, DirectoryCopy, FileCopy, send_directory, send_file};
use crate::identity::LOCAL_MACHINE;
use crate::router::Router;
use crate::trust::Case;

pub(crate) struct FsService;

const DEFAULT_FORMAT: &str = "native";

fn copy_parser() -> OptionParser {
    OptionParser::new()
        .flag("COPY")
        .value("FILE")
        .value("DIRECTORY")
        .value("TOFILE")
        .value("TODIRECTORY")
        .value("TOMACHINE")
        .flag("TEXT")
        .value("FORMAT")
        .flag("FAILIFEXISTS")
        .flag("FAILIFNEW")
        .value("NAME")
        .value("EXT")
        .flag("CASESENSITIVE")
        .flag("CASEINSENSITIVE")
        .flag("RECURSE")
        .flag("KEEPEMPTYDIRECTORIES")
        .flag("ONLYDIRECTORIES")
        .flag("IGNOREERRORS")
        .repeated("TEXTEXT")
}

fn list_parser() -> OptionParser {
    OptionParser::new()
        .flag("LIST")
        .flag("COPYREQUESTS")
        .flag("INBOUND")
        .flag("OUTBOUND")
        .flag("FILE")
        .flag("DIRECTORY")
}

impl Service for FsService {
    fn name(&self) -> &str {
        "FS"
    }

    fn accept(&self, router: &Router, request: &ServiceRequest) -> ServiceResult {
        let command = request.request.split_whitespace().next().unwrap_or_default();
        let outcome = if command.eq_ignore_ascii_case("COPY") {
            copy_parser()
                .parse(&request.request)
                .and_then(|parsed| copy(router, request, &parsed))
        } else if command.eq_ignore_ascii_case("LIST") {
            list_parser()
                .parse(&request.request)
                .and_then(|parsed| list(router, request, &parsed))
        } else {
            Err(unknown_command(request))
        };
        outcome.unwrap_or_else(|error| error)
    }
}

fn copy(
    router: &Router,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    parsed.exclusive(&["FILE", "DIRECTORY"])?;
    parsed.exclusive(&["TOFILE", "TODIRECTORY"])?;
    parsed.exclusive(&["FAILIFEXISTS", "FAILIFNEW"])?;
    parsed.exclusive(&["CASESENSITIVE", "CASEINSENSITIVE"])?;
    request.require_trust(4, "COPY")?;

    let flags = if parsed.has("FAILIFEXISTS") {
        CopyFlags::FAIL_IF_EXISTS
    } else if parsed.has("FAILIFNEW") {
        CopyFlags::FAIL_IF_NEW
    } else {
        CopyFlags::empty()
    };
    let to_machine = parsed.value("TOMACHINE").unwrap_or(LOCAL_MACHINE).to_owned();
    let format = parsed.value("FORMAT").unwrap_or(DEFAULT_FORMAT).to_owned();

    if let Some(file) = parsed.value("FILE") {
        if parsed.has("RECURSE") || parsed.has("TEXTEXT") {
            return Err(invalid("Directory options do not apply to COPY FILE"));
        }
        let copy = FileCopy {
            source: PathBuf::from(file),
            to_file: destination_file(file, parsed),
            to_machine,
            text: parsed.has("TEXT").then_some(format),
            flags,
        };
        return Ok(send_file(router, request, &copy));
    }

    let Some(directory) = parsed.value("DIRECTORY") else {
        return Err(invalid("COPY requires FILE or DIRECTORY"));
    };
    if parsed.has("TOFILE") || parsed.has("TEXT") {
        return Err(invalid("TOFILE and TEXT do not apply to COPY DIRECTORY"));
    }
    let copy = DirectoryCopy {
        source: PathBuf::from(directory),
        to_machine,
        to_directory: parsed.value("TODIRECTORY").unwrap_or(directory).to_owned(),
        name: parsed.value("NAME").unwrap_or("*").to_owned(),
        extension: parsed.value("EXT").unwrap_or("*").to_owned(),
        case: if parsed.has("CASEINSENSITIVE") {
            Case::Insensitive
        } else {
            Case::Sensitive
        },
        recurse: parsed.has("RECURSE"),
        keep_empty_directories: parsed.has("KEEPEMPTYDIRECTORIES"),
        only_directories: parsed.has("ONLYDIRECTORIES"),
        ignore_errors: parsed.has("IGNOREERRORS"),
        text_extensions: parsed
            .values("TEXTEXT")
            .into_iter()
            .map(str::to_owned)
            .collect(),
        format,
        flags,
    };
    Ok(send_directory(router, request, &copy))
}

/// `TOFILE`, else the source name inside `TODIRECTORY`, else the source path.
fn destination_file(file: &str, parsed: &ParsedRequest) -> String {
    if let Some(to_file) = parsed.value("TOFILE") {
        return to_file.to_owned();
    }
    match (parsed.value("TODIRECTORY"), Path::new(file).file_name()) {
        (Some(directory), Some(name)) => Path::new(directory).join(name).display().to_string(),
        _ => file.to_owned(),
    }
}

fn list(
    router: &Router,
    request: &ServiceRequest,
    parsed: &ParsedRequest,
) -> Result<ServiceResult, ServiceResult> {
    if !parsed.has("COPYREQUESTS") {
        return Err(invalid("LIST requires COPYREQUESTS"));
    }
    request.require_trust(2, "LIST")?;
    let direction = match (parsed.has("INBOUND"), parsed.has("OUTBOUND")) {
        (true, false) => Some(Direction::To),
        (false, true) => Some(Direction::From),
        _ => None,
    };
    let kind = match (parsed.has("FILE"), parsed.has("DIRECTORY")) {
        (true, false) => Some(EntryKind::File),
        (false, true) => Some(EntryKind::Directory),
        _ => None,
    };
    let rows: Vec<CopySummary> = router
        .copies()
        .snapshot()
        .into_iter()
        .filter(|row| direction.is_none_or(|wanted| row.direction == wanted))
        .filter(|row| kind.is_none_or(|wanted| row.kind == wanted))
        .collect();
    Ok(ServiceResult::json(&rows))
}

fn invalid(message: &str) -> ServiceResult {
    ServiceResult::error(ReturnCode::InvalidRequestString, message)
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use staf_proto::copy::TransferMode;

    use super::*;
    use crate::copy::CopyTicket;
    use crate::router::test_support::router;

    #[fixture]
    fn operator() -> ServiceRequest {
        ServiceRequest {
            service: "FS".to_owned(),
            trust_level: 4,
            ..ServiceRequest::default()
        }
    }

    fn run(router: &Router, request: &ServiceRequest, text: &str) -> ServiceResult {
        let request = ServiceRequest {
            request: text.to_owned(),
            ..request.clone()
        };
        FsService.accept(router, &request)
    }

    #[rstest]
    #[case("COPY FILE /a TOFILE /b TODIRECTORY /c")]
    #[case("COPY FILE /a DIRECTORY /b")]
    #[case("COPY FILE /a FAILIFEXISTS FAILIFNEW")]
    #[case("COPY FILE /a RECURSE")]
    #[case("COPY DIRECTORY /a TEXT")]
    #[case("COPY TOMACHINE peer")]
    #[case("LIST")]
    #[case("MOVE FILE /a")]
    fn malformed_requests_are_rejected(operator: ServiceRequest, #[case] text: &str) {
        let result = run(&router(5), &operator, text);
        assert_eq!(result.rc, ReturnCode::InvalidRequestString, "{result}");
    }

    #[rstest]
    fn copies_need_trust_level_four(operator: ServiceRequest) {
        let reader = ServiceRequest {
            trust_level: 3,
            ..operator
        };
        let result = run(&router(5), &reader, "COPY FILE /etc/hostname TOFILE /tmp/x");
        assert_eq!(result.rc, ReturnCode::AccessDenied);
    }

    #[rstest]
    fn missing_sources_are_reported(operator: ServiceRequest) {
        let missing = tempfile::tempdir().expect("tempdir");
        let source = missing.path().join("absent.txt");
        let text = format!("COPY FILE {} TOFILE /tmp/never", source.display());
        assert_eq!(run(&router(5), &operator, &text).rc, ReturnCode::DoesNotExist);

        let text = format!("COPY DIRECTORY {}", source.display());
        assert_eq!(run(&router(5), &operator, &text).rc, ReturnCode::DoesNotExist);
    }

    #[rstest]
    #[case("COPY FILE /src/a.txt TOFILE /dst/b.txt", "/dst/b.txt")]
    #[case("COPY FILE /src/a.txt TODIRECTORY /dst", "/dst/a.txt")]
    #[case("COPY FILE /src/a.txt", "/src/a.txt")]
    fn destinations_follow_the_target_options(#[case] text: &str, #[case] expected: &str) {
        let parsed = copy_parser().parse(text).expect("parses");
        let file = parsed.value("FILE").expect("file");
        assert_eq!(destination_file(file, &parsed), expected);
    }

    #[rstest]
    fn copy_requests_are_listed_and_filtered(operator: ServiceRequest) {
        let router = router(5);
        let ticket = |name: &str, direction, kind| CopyTicket {
            name: name.into(),
            machine: "peer".to_owned(),
            direction,
            kind,
            mode: TransferMode::Binary,
            size: 10,
        };
        let _inbound = router
            .copies()
            .register(ticket("/in/file", Direction::To, EntryKind::File))
            .expect("inbound");
        let _outbound = router
            .copies()
            .register(ticket("/out/tree", Direction::From, EntryKind::Directory))
            .expect("outbound");

        let all = run(&router, &operator, "LIST COPYREQUESTS");
        let rows: serde_json::Value = serde_json::from_str(&all.result).expect("json");
        assert_eq!(rows.as_array().map(Vec::len), Some(2));

        let inbound = run(&router, &operator, "LIST COPYREQUESTS INBOUND FILE");
        let rows: serde_json::Value = serde_json::from_str(&inbound.result).expect("json");
        assert_eq!(rows.as_array().map(Vec::len), Some(1));
        assert_eq!(rows[0]["name"], "/in/file");

        let none = run(&router, &operator, "LIST COPYREQUESTS OUTBOUND FILE");
        assert_eq!(none.result, "[]");
    }
}
