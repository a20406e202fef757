//! Outbound side of a single-file copy.
//!
//! The sender prefers the negotiated file-transfer API and falls back to the
//! legacy binary-only API on a fresh connection when the receiver does not
//! know it. Text copies need level 2 or better; a legacy receiver is told to
//! abort by sending both existence flags at once.

use std::path::PathBuf;

use tracing::{debug, warn};

use staf_proto::copy::{CopyFlags, EntryKind, STOP_COPY, TransferMode};
use staf_proto::{Api, ReadWire, ReturnCode, WriteWire};

use super::COPY_TARGET;
use super::authorize::outbound_identity;
use super::codepage::Codepage;
use super::disk::{RetryPolicy, SourceFile};
use super::eol;
use super::outbound::{dial, fault_result, target_machine};
use super::receive_file::FileApi;
use super::registry::{CopyTicket, Direction};
use super::transfer::{
    CopyFault, send_acked_chunks, send_converted, send_sized_binary, send_text,
};
use crate::connections::Dial;
use crate::dispatch::{Opened, open_api, open_legacy_api};
use crate::router::Router;
use crate::services::{ServiceRequest, ServiceResult};

/// A resolved `FS COPY FILE` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileCopy {
    pub(crate) source: PathBuf,
    pub(crate) to_machine: String,
    /// Destination path, resolved by the receiver.
    pub(crate) to_file: String,
    /// Requested line ending when copying as text.
    pub(crate) text: Option<String>,
    pub(crate) flags: CopyFlags,
}

/// Copies one file to `copy.to_machine`.
pub(crate) fn send_file(router: &Router, request: &ServiceRequest, copy: &FileCopy) -> ServiceResult {
    let machine = target_machine(router, request, &copy.to_machine);
    let mut connect = || dial(router, request, &machine);
    push_file(router, request, copy, &machine, &mut connect)
}

pub(super) fn push_file(
    router: &Router,
    request: &ServiceRequest,
    copy: &FileCopy,
    machine: &str,
    connect: &mut Dial<'_>,
) -> ServiceResult {
    let from_file = copy.source.display().to_string();
    if !copy.source.exists() {
        return ServiceResult::error(
            ReturnCode::DoesNotExist,
            format!("File {from_file} does not exist"),
        );
    }
    let mut source = match SourceFile::open(&copy.source, RetryPolicy::DISK) {
        Ok(source) => source,
        Err(_) => return ServiceResult::error(ReturnCode::FileOpenError, from_file),
    };
    let length = match source.len() {
        Ok(length) => length,
        Err(error) => {
            return ServiceResult::error(
                ReturnCode::BaseOsError,
                format!(
                    "Error on From File: {from_file}\n{error}: {}",
                    error.raw_os_error().unwrap_or_default()
                ),
            );
        }
    };
    let Ok(length) = u32::try_from(length) else {
        return ServiceResult::error(
            ReturnCode::FileReadError,
            format!(
                "File size exceeds the maximum size ({}) supported.  File name: {from_file}",
                u32::MAX
            ),
        );
    };

    let outcome = transfer(router, request, copy, machine, &mut source, length, connect);
    let result = outcome.unwrap_or_else(|fault| fault_result(&fault, &from_file));
    debug!(
        target: COPY_TARGET,
        file = %from_file,
        machine,
        rc = %result.rc,
        "file copy finished"
    );
    result
}

fn transfer(
    router: &Router,
    request: &ServiceRequest,
    copy: &FileCopy,
    machine: &str,
    source: &mut SourceFile,
    length: u32,
    connect: &mut Dial<'_>,
) -> Result<ServiceResult, CopyFault> {
    let mut link = match connect() {
        Ok(link) => link,
        Err(refused) => return Ok(refused),
    };
    let (api, level) = match open_api(&mut *link.stream, Api::FileTransferV2, 1..=3)? {
        Opened::Level(level) => (FileApi::Current, level),
        Opened::NoCommonLevel => return Ok(ServiceResult::error(ReturnCode::InvalidApiLevel, "")),
        Opened::Refused(_) => {
            link = match connect() {
                Ok(link) => link,
                Err(refused) => return Ok(refused),
            };
            let ack = open_legacy_api(&mut *link.stream, Api::FileTransfer, 0)?;
            if !ack.is_ok() {
                return Ok(ServiceResult::error(ack, ""));
            }
            (FileApi::Legacy, 0)
        }
    };
    let typed = api == FileApi::Current && level > 1;
    let requested = if copy.text.is_some() {
        TransferMode::TextConvert
    } else {
        TransferMode::Binary
    };
    let connection = &mut *link.stream;

    if typed {
        connection.write_uint(requested.to_wire())?;
    }
    connection.write_string(router.identity().machine())?;
    connection.write_string(&request.machine)?;
    connection.write_string(&copy.to_file)?;
    if !typed && copy.text.is_some() {
        let abort = CopyFlags::FAIL_IF_EXISTS.union(CopyFlags::FAIL_IF_NEW);
        connection.write_uint(abort.bits())?;
        let confirmation = connection.read_rc()?;
        let detail = connection.read_string()?;
        if confirmation.is_ok() {
            warn!(target: COPY_TARGET, machine, "legacy receiver accepted an aborted text copy");
        }
        return Ok(ServiceResult::error(
            ReturnCode::InvalidApiLevel,
            format!("{machine} cannot receive text copies (rc {confirmation}: {detail})"),
        ));
    }

    let Some(lease) = router.copies().register(CopyTicket {
        name: copy.source.clone(),
        machine: machine.to_owned(),
        direction: Direction::From,
        kind: EntryKind::File,
        mode: requested,
        size: u64::from(length),
    }) else {
        return Ok(ServiceResult::error(
            ReturnCode::FileReadError,
            "Cannot read from a file that another copy request is currently writing to",
        ));
    };

    connection.write_uint(copy.flags.bits())?;
    if api == FileApi::Current && level > 2 {
        outbound_identity(router, request, link.provider.as_ref()).write(connection)?;
        connection.write_pairs(&request.request_pool.pairs())?;
        connection.write_pairs(&request.source_shared_pool.pairs())?;
    }
    let ack = connection.read_rc()?;
    let detail = connection.read_string()?;
    if !ack.is_ok() {
        return Ok(ServiceResult::error(ack, detail));
    }

    let codepage = Codepage::for_label(&router.settings().codepage());
    let mut text = copy.text.is_some();
    let mut convert = text;
    let mut current_eol = String::new();
    if let Some(format) = &copy.text {
        current_eol = match eol::detect(&mut *source, eol::native()) {
            Ok(found) => found,
            Err(error) => {
                return Ok(ServiceResult::error(
                    ReturnCode::FileReadError,
                    format!("{}: {error}", copy.source.display()),
                ));
            }
        };
        source.rewind().map_err(CopyFault::Source)?;
        connection.write_string(format)?;
        if connection.read_uint()? == STOP_COPY {
            return Ok(ServiceResult::error(ReturnCode::BaseOsError, "Get current EOL failure"));
        }
        let new_eol = connection.read_string()?;
        if new_eol == current_eol {
            connection.write_uint(TransferMode::Binary.to_wire())?;
            text = false;
        } else {
            connection.write_uint(TransferMode::TextNoConvert.to_wire())?;
        }
    }
    if convert {
        let other = connection.read_string()?;
        if codepage.same_as(&other) {
            connection.write_uint(TransferMode::TextNoConvert.to_wire())?;
            convert = false;
        } else {
            connection.write_uint(TransferMode::TextConvert.to_wire())?;
        }
    }

    let mode = if convert {
        TransferMode::TextConvert
    } else if text {
        TransferMode::TextNoConvert
    } else {
        TransferMode::Binary
    };
    lease.set_mode(mode);
    let rc = match (mode, api) {
        (TransferMode::TextConvert, _) => {
            send_converted(connection, source, &current_eol, codepage, &lease)?
        }
        (TransferMode::TextNoConvert, _) => send_text(connection, source, &current_eol, &lease)?,
        (TransferMode::Binary, FileApi::Current) => {
            send_sized_binary(connection, source, length, &lease)?
        }
        (TransferMode::Binary, FileApi::Legacy) => send_acked_chunks(connection, source, &lease)?,
    };
    Ok(if rc.is_ok() {
        ServiceResult::ok("")
    } else {
        ServiceResult::error(rc, copy.to_file.clone())
    })
}
