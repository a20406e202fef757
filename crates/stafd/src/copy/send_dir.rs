//! Outbound side of a directory copy.
//!
//! Files are selected by name and extension patterns; directories are only
//! filtered by the walk options. A failing entry is recorded and the walk
//! continues, so one unreadable file does not abort the copy.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use staf_proto::copy::{CONTINUE_COPY, CopyFlags, EntryKind, STOP_COPY, TransferMode};
use staf_proto::{Api, ReadWire, ReturnCode, WriteWire};

use super::COPY_TARGET;
use super::authorize::outbound_identity;
use super::codepage::Codepage;
use super::disk::{RetryPolicy, SourceFile};
use super::eol;
use super::outbound::{dial, fault_result, target_machine};
use super::registry::{CopyLease, CopyTicket, Direction, normalize};
use super::transfer::{
    CopyFault, send_converted, send_sized_binary, send_stepped_binary, send_text,
};
use crate::connections::Dial;
use crate::dispatch::{Opened, open_api};
use crate::identity::is_local_target;
use crate::router::Router;
use crate::services::{ServiceRequest, ServiceResult};
use crate::submit::submit_internal;
use crate::transport::WireStream;
use crate::trust::{Case, matches_wildcards};

/// A resolved `FS COPY DIRECTORY` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirectoryCopy {
    pub(crate) source: PathBuf,
    pub(crate) to_machine: String,
    /// Destination directory, resolved by the receiver.
    pub(crate) to_directory: String,
    pub(crate) name: String,
    pub(crate) extension: String,
    pub(crate) case: Case,
    pub(crate) recurse: bool,
    pub(crate) keep_empty_directories: bool,
    pub(crate) only_directories: bool,
    pub(crate) ignore_errors: bool,
    /// Extension patterns of files copied as text.
    pub(crate) text_extensions: Vec<String>,
    pub(crate) format: String,
    pub(crate) flags: CopyFlags,
}

impl DirectoryCopy {
    fn selects(&self, path: &Path) -> bool {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy())
            .unwrap_or_default();
        matches_wildcards(&stem, &self.name, self.case)
            && matches_wildcards(&extension_of(path), &self.extension, self.case)
    }

    fn is_text(&self, path: &Path) -> bool {
        let extension = extension_of(path);
        self.text_extensions
            .iter()
            .any(|pattern| matches_wildcards(&extension, pattern, self.case))
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|extension| extension.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One failed entry in the result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct EntryError {
    name: String,
    rc: u32,
    #[serde(rename = "osRC", skip_serializing_if = "Option::is_none")]
    os_rc: Option<i32>,
}

/// Copies a directory tree to `copy.to_machine`.
pub(crate) fn send_directory(
    router: &Router,
    request: &ServiceRequest,
    copy: &DirectoryCopy,
) -> ServiceResult {
    let machine = target_machine(router, request, &copy.to_machine);
    let mut connect = || dial(router, request, &machine);
    push_directory(router, request, copy, &machine, &mut connect)
}

pub(super) fn push_directory(
    router: &Router,
    request: &ServiceRequest,
    copy: &DirectoryCopy,
    machine: &str,
    connect: &mut Dial<'_>,
) -> ServiceResult {
    let shown = copy.source.display().to_string();
    if !copy.source.exists() {
        return ServiceResult::error(
            ReturnCode::DoesNotExist,
            format!("Directory, {shown}, does Not Exist"),
        );
    }
    let root = normalize(&copy.source);
    let from_dir = root.display().to_string();
    if !root.is_dir() {
        return ServiceResult::error(ReturnCode::InvalidValue, format!("{from_dir} is Not a Directory"));
    }
    if copy.recurse
        && let Some(refusal) = cyclic_guard(router, copy, machine, &root)
    {
        return refusal;
    }

    let mut link = match connect() {
        Ok(link) => link,
        Err(refused) => return refused,
    };
    let level = match open_api(&mut *link.stream, Api::DirectoryCopy, 1..=4) {
        Ok(Opened::Level(level)) => level,
        Ok(Opened::Refused(rc)) => {
            return ServiceResult::error(rc, "No Support for Directory Copy API");
        }
        Ok(Opened::NoCommonLevel) => {
            return ServiceResult::error(ReturnCode::InvalidApiLevel, "Invalid API Level");
        }
        Err(error) => return fault_result(&error.into(), &from_dir),
    };
    if level < 2 && !copy.text_extensions.is_empty() {
        return ServiceResult::error(ReturnCode::InvalidApiLevel, "Invalid API Level");
    }

    let Some(lease) = router.copies().register(CopyTicket {
        name: root.clone(),
        machine: machine.to_owned(),
        direction: Direction::From,
        kind: EntryKind::Directory,
        mode: TransferMode::Binary,
        size: 0,
    }) else {
        return ServiceResult::error(
            ReturnCode::FileReadError,
            format!(
                "Cannot read from directory {from_dir} at the same time another copy request \
                 is writing to it"
            ),
        );
    };

    let connection = &mut *link.stream;
    let header = (|| -> Result<ServiceResult, CopyFault> {
        connection.write_string(router.identity().machine())?;
        connection.write_string(&request.endpoint)?;
        connection.write_string(&copy.to_directory)?;
        connection.write_uint(copy.flags.bits())?;
        if level > 2 {
            outbound_identity(router, request, link.provider.as_ref()).write(&mut *connection)?;
        }
        if level > 1 {
            connection.write_string(&copy.format)?;
        }
        if level > 2 {
            connection.write_pairs(&request.request_pool.pairs())?;
            connection.write_pairs(&request.source_shared_pool.pairs())?;
        }
        let ack = connection.read_rc()?;
        let detail = connection.read_string()?;
        Ok(ServiceResult::new(ack, detail))
    })();
    match header {
        Ok(ack) if ack.is_ok() => {}
        Ok(refused) => return refused,
        Err(fault) => return fault_result(&fault, &from_dir),
    }

    let mut walker = Walker {
        copy,
        connection,
        level,
        root,
        new_eol: eol::native().to_owned(),
        last_eol: eol::native().to_owned(),
        convert: false,
        codepage: Codepage::for_label(&router.settings().codepage()),
        lease: &lease,
        errors: Vec::new(),
    };
    let outcome = walker.run();
    let errors = std::mem::take(&mut walker.errors);
    if let Err(fault) = outcome {
        return fault_result(&fault, &from_dir);
    }
    debug!(
        target: COPY_TARGET,
        directory = %from_dir,
        machine,
        failures = errors.len(),
        "directory copy finished"
    );
    if errors.is_empty() || copy.ignore_errors {
        return ServiceResult::ok("");
    }
    match serde_json::to_string(&errors) {
        Ok(listing) => ServiceResult::error(ReturnCode::DirectoryCopyError, listing),
        Err(error) => ServiceResult::error(ReturnCode::DirectoryCopyError, error.to_string()),
    }
}

/// Refuses a recursive copy into the source tree on this same daemon.
fn cyclic_guard(
    router: &Router,
    copy: &DirectoryCopy,
    machine: &str,
    root: &Path,
) -> Option<ServiceResult> {
    let local = is_local_target(machine) || {
        let whoami = submit_internal(router, machine, "MISC", "WHOAMI");
        whoami.is_ok()
            && serde_json::from_str::<serde_json::Value>(&whoami.result)
                .ok()
                .and_then(|value| value.get("isLocalRequest").cloned())
                .is_some_and(|flag| flag == "Yes")
    };
    if !local {
        return None;
    }
    let target = normalize(Path::new(&router.resolve(&copy.to_directory, &[])));
    if target == root {
        return Some(ServiceResult::error(
            ReturnCode::FileWriteError,
            format!(
                "Cannot write to directory {} at the same time this request is reading from it",
                target.display()
            ),
        ));
    }
    if target.starts_with(root) || root.starts_with(&target) {
        return Some(ServiceResult::error(
            ReturnCode::DirectoryCopyError,
            "Cannot perform a cyclic copy (the source includes the destination)",
        ));
    }
    None
}

struct Walker<'a, 'l> {
    copy: &'a DirectoryCopy,
    connection: &'a mut dyn WireStream,
    level: u32,
    root: PathBuf,
    new_eol: String,
    /// Line ending of the last text file, used when a file has none.
    last_eol: String,
    convert: bool,
    codepage: Codepage,
    lease: &'a CopyLease<'l>,
    errors: Vec<EntryError>,
}

#[derive(Debug, Default)]
struct Listing {
    files: Vec<PathBuf>,
    directories: Vec<PathBuf>,
}

impl Walker<'_, '_> {
    fn run(&mut self) -> Result<(), CopyFault> {
        if self.level > 1 {
            self.new_eol = self.connection.read_string()?;
            let wanted = if self.copy.text_extensions.is_empty() {
                TransferMode::Binary
            } else {
                TransferMode::TextConvert
            };
            self.connection.write_uint(wanted.to_wire())?;
            if wanted == TransferMode::TextConvert {
                let other = self.connection.read_string()?;
                self.convert = !self.codepage.same_as(&other);
            }
        }
        let root = self.root.clone();
        if self.copy.recurse {
            self.walk(&root)?;
        } else {
            let listing = self.list(&root);
            self.send_files(&listing.files)?;
        }
        self.connection.write_uint(STOP_COPY)?;
        Ok(())
    }

    fn list(&mut self, directory: &Path) -> Listing {
        let mut listing = Listing::default();
        let children = WalkDir::new(directory)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        for child in children {
            match child {
                Ok(child) if child.file_type().is_dir() => {
                    listing.directories.push(child.into_path());
                }
                Ok(child) if child.path().is_file() => {
                    if self.copy.selects(child.path()) {
                        listing.files.push(child.into_path());
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    let name = error
                        .path()
                        .unwrap_or(directory)
                        .display()
                        .to_string();
                    let os_rc = error.io_error().and_then(std::io::Error::raw_os_error);
                    self.fail(name, ReturnCode::BaseOsError, os_rc);
                }
            }
        }
        listing
    }

    fn walk(&mut self, directory: &Path) -> Result<(), CopyFault> {
        let listing = self.list(directory);
        let announce = self.copy.only_directories
            || self.copy.keep_empty_directories
            || !listing.files.is_empty();
        if directory != self.root && announce {
            let relative = self.relative(directory);
            self.connection.write_uint(CONTINUE_COPY)?;
            self.connection.write_uint(EntryKind::Directory.to_wire())?;
            self.connection.write_string(&relative)?;
            let rc = self.connection.read_rc()?;
            let detail = self.connection.read_string()?;
            if !rc.is_ok() {
                self.fail(directory.display().to_string(), rc, detail.parse().ok());
            }
        }
        if !self.copy.only_directories {
            self.send_files(&listing.files)?;
        }
        for child in &listing.directories {
            self.walk(child)?;
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|component| format!("/{}", component.as_os_str().to_string_lossy()))
            .collect()
    }

    fn fail(&mut self, name: String, rc: ReturnCode, os_rc: Option<i32>) {
        debug!(target: COPY_TARGET, entry = %name, rc = %rc, "directory entry failed");
        self.errors.push(EntryError {
            name,
            rc: rc.code(),
            os_rc,
        });
    }

    fn send_files(&mut self, files: &[PathBuf]) -> Result<(), CopyFault> {
        for path in files {
            self.send_file(path)?;
        }
        Ok(())
    }

    fn send_file(&mut self, path: &Path) -> Result<(), CopyFault> {
        let name = path.display().to_string();
        let mut source = match SourceFile::open(path, RetryPolicy::DISK) {
            Ok(source) => source,
            Err(error) => {
                self.fail(name, ReturnCode::FileOpenError, error.raw_os_error());
                return Ok(());
            }
        };
        let Some(length) = source.len().ok().and_then(|length| u32::try_from(length).ok()) else {
            self.fail(name, ReturnCode::FileReadError, None);
            return Ok(());
        };

        let text_file = self.copy.is_text(path);
        let mut current_eol = self.last_eol.clone();
        if text_file {
            let detected = eol::detect(&mut source, &self.last_eol)
                .and_then(|found| source.rewind().map(|()| found));
            match detected {
                Ok(found) => {
                    current_eol = found;
                    self.last_eol.clone_from(&current_eol);
                }
                Err(error) => {
                    self.fail(name, ReturnCode::FileReadError, error.raw_os_error());
                    return Ok(());
                }
            }
        }
        let mode = if self.convert && text_file {
            TransferMode::TextConvert
        } else if text_file && self.new_eol != current_eol {
            TransferMode::TextNoConvert
        } else {
            TransferMode::Binary
        };

        let relative = self.relative(path);
        self.connection.write_uint(CONTINUE_COPY)?;
        self.connection.write_uint(EntryKind::File.to_wire())?;
        self.connection.write_string(&relative)?;
        if self.level > 1 {
            self.connection.write_uint(mode.to_wire())?;
        }
        let ack = self.connection.read_rc()?;
        let _detail = self.connection.read_string()?;
        if !ack.is_ok() {
            self.fail(name, ack, None);
            return Ok(());
        }

        self.lease.start_entry(&name, mode, u64::from(length));
        let connection = &mut *self.connection;
        let rc = match mode {
            TransferMode::TextConvert => {
                send_converted(connection, &mut source, &current_eol, self.codepage, self.lease)?
            }
            TransferMode::TextNoConvert => {
                send_text(connection, &mut source, &current_eol, self.lease)?
            }
            TransferMode::Binary if self.level > 3 => {
                send_sized_binary(connection, &mut source, length, self.lease)?
            }
            TransferMode::Binary => send_stepped_binary(connection, &mut source, length, self.lease)?,
        };
        if !rc.is_ok() {
            self.fail(name, rc, None);
        }
        Ok(())
    }
}
