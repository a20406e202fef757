//! Inbound side of a directory copy (API 6).
//!
//! After the header and trust check the sender streams entries until it
//! sends anything other than [`CONTINUE_COPY`]. Each entry is a directory to
//! create or a file to write, named relative to the target directory. One
//! registry lease covers the whole directory; file progress is tracked as
//! the lease's current entry.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use staf_proto::copy::{CONTINUE_COPY, CopyFlags, EntryKind, TransferMode};
use staf_proto::{ReadWire, ReturnCode, WireError, WriteWire};

use super::COPY_TARGET;
use super::authorize::{IdentityBlock, authorize};
use super::codepage::Codepage;
use super::eol;
use super::registry::{CopyLease, CopyTicket, Direction, normalize};
use super::transfer::{
    TargetFile, receive_converted, receive_sized_binary, receive_stepped_binary, receive_text,
};
use crate::router::Router;
use crate::transport::Peer;
use crate::variables::VariablePool;

/// Per-conversation values every entry needs.
struct Session<'a> {
    root: String,
    level: u32,
    new_eol: String,
    codepage: Codepage,
    lease: &'a CopyLease<'a>,
}

pub(crate) fn receive_directory<C: Read + Write + ?Sized>(
    router: &Router,
    connection: &mut C,
    peer: &Peer<'_>,
    level: u32,
) -> Result<(), WireError> {
    let from_machine = connection.read_string()?;
    let origin_machine = connection.read_string()?;
    let to_directory = connection.read_string()?;
    let flags = CopyFlags::from_bits(connection.read_uint()?);
    let block = if level > 2 {
        Some(IdentityBlock::read(connection)?)
    } else {
        None
    };
    let new_eol = if level > 1 {
        eol::resolve(&connection.read_string()?)
    } else {
        eol::native().to_owned()
    };
    let (request_pool, source_pool) = if level > 2 {
        (
            VariablePool::from_pairs(connection.read_pairs()?),
            VariablePool::from_pairs(connection.read_pairs()?),
        )
    } else {
        (VariablePool::new(), VariablePool::new())
    };

    let verdict = authorize(router, peer, &origin_machine, block);
    if !verdict.is_ok() {
        return connection.write_result(verdict.rc, &verdict.result);
    }

    let resolved = router.resolve(&to_directory, &[&request_pool, &source_pool]);
    let root_path = normalize(Path::new(&resolved));
    let root = root_path.display().to_string();
    let exists = root_path.exists();
    if flags.contains(CopyFlags::FAIL_IF_EXISTS) && exists {
        return connection.write_result(ReturnCode::AlreadyExists, &root);
    }
    if flags.contains(CopyFlags::FAIL_IF_NEW) && !exists {
        return connection.write_result(ReturnCode::DoesNotExist, &root);
    }
    if let Err(error) = std::fs::create_dir_all(&root_path) {
        return connection.write_result(
            ReturnCode::BaseOsError,
            &format!(
                "OSRC: {}, Error on Creating a Directory: {root}",
                error.raw_os_error().unwrap_or_default()
            ),
        );
    }

    let Some(lease) = router.copies().register(CopyTicket {
        name: root_path.clone(),
        machine: from_machine.clone(),
        direction: Direction::To,
        kind: EntryKind::Directory,
        mode: TransferMode::Binary,
        size: 0,
    }) else {
        return connection.write_result(
            ReturnCode::FileWriteError,
            &format!(
                "Cannot write to directory {root} at the same time this request is reading \
                 from it or if another copy request is currently reading or writing to the \
                 directory."
            ),
        );
    };
    connection.write_result(ReturnCode::Ok, "")?;

    let codepage = Codepage::for_label(&router.settings().codepage());
    if level > 1 {
        connection.write_string(&new_eol)?;
        if TransferMode::from_wire(connection.read_uint()?) == TransferMode::TextConvert {
            connection.write_string(codepage.name())?;
        }
    }

    let session = Session {
        root,
        level,
        new_eol,
        codepage,
        lease: &lease,
    };
    let mut entries = 0_u32;
    while connection.read_uint()? == CONTINUE_COPY {
        match EntryKind::from_wire(connection.read_uint()?) {
            Some(EntryKind::Directory) => session.create_directory(connection)?,
            Some(EntryKind::File) => session.receive_entry(connection)?,
            None => {
                warn!(target: COPY_TARGET, directory = %session.root, "unknown entry tag");
                break;
            }
        }
        entries += 1;
    }
    debug!(
        target: COPY_TARGET,
        directory = %session.root,
        from = %from_machine,
        entries,
        "directory received"
    );
    Ok(())
}

impl Session<'_> {
    fn entry_path(&self, relative: &str) -> String {
        format!("{}{relative}", self.root)
    }

    fn create_directory<C: Read + Write + ?Sized>(&self, connection: &mut C) -> Result<(), WireError> {
        let directory = self.entry_path(&connection.read_string()?);
        self.lease.start_entry(&directory, TransferMode::Binary, 0);
        match std::fs::create_dir_all(&directory) {
            Ok(()) => connection.write_result(ReturnCode::Ok, ""),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                connection.write_result(ReturnCode::Ok, "")
            }
            Err(error) => connection.write_result(
                ReturnCode::BaseOsError,
                &error.raw_os_error().unwrap_or_default().to_string(),
            ),
        }
    }

    fn receive_entry<C: Read + Write + ?Sized>(&self, connection: &mut C) -> Result<(), WireError> {
        let name = self.entry_path(&connection.read_string()?);
        let mode = if self.level > 1 {
            TransferMode::from_wire(connection.read_uint()?)
        } else {
            TransferMode::Binary
        };
        self.lease.start_entry(&name, mode, 0);
        let path = PathBuf::from(&name);
        let mut target = match TargetFile::create(&path, self.lease) {
            Ok(target) => target,
            Err(error) => {
                debug!(target: COPY_TARGET, file = %name, error = %error, "cannot open entry");
                return connection.write_result(ReturnCode::FileOpenError, &name);
            }
        };
        connection.write_result(ReturnCode::Ok, "")?;

        match mode {
            TransferMode::TextConvert => {
                let rc = receive_converted(connection, &mut target, &self.new_eol, self.codepage)?;
                connection.write_rc(rc)
            }
            TransferMode::TextNoConvert => {
                let rc = receive_text(connection, &mut target, &self.new_eol)?;
                connection.write_rc(rc)
            }
            TransferMode::Binary => {
                let length = connection.read_uint()?;
                self.lease.set_size(u64::from(length));
                if self.level > 3 {
                    let rc = receive_sized_binary(connection, &mut target, length)?;
                    connection.write_rc(rc)
                } else {
                    receive_stepped_binary(connection, &mut target, length)
                }
            }
        }
    }
}
