//! Inbound side of a single-file copy (APIs 4 and 5).

use std::io::{Read, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use staf_proto::copy::{CONTINUE_COPY, CopyFlags, EntryKind, TransferMode};
use staf_proto::{ReadWire, ReturnCode, WireError, WriteWire};

use super::COPY_TARGET;
use super::authorize::{IdentityBlock, authorize};
use super::codepage::Codepage;
use super::eol;
use super::registry::{CopyTicket, Direction};
use super::transfer::{
    TargetFile, receive_acked_chunks, receive_converted, receive_sized_binary, receive_text,
};
use crate::router::Router;
use crate::transport::Peer;
use crate::variables::VariablePool;

/// Which file-transfer API the sender opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileApi {
    /// API 4: binary only, every chunk acknowledged.
    Legacy,
    /// API 5: negotiated level, text and codepage conversion.
    Current,
}

/// Receives one file from `peer`.
///
/// Every refusal is reported on the connection; `Err` means the
/// conversation itself broke.
pub(crate) fn receive_file<C: Read + Write + ?Sized>(
    router: &Router,
    connection: &mut C,
    peer: &Peer<'_>,
    api: FileApi,
    level: u32,
) -> Result<(), WireError> {
    let current = api == FileApi::Current;
    let requested = if current && level > 1 {
        TransferMode::from_wire(connection.read_uint()?)
    } else {
        TransferMode::Binary
    };
    let mut text = requested != TransferMode::Binary;
    let mut convert = requested == TransferMode::TextConvert;

    let from_machine = connection.read_string()?;
    let origin_machine = connection.read_string()?;
    let to_file = connection.read_string()?;
    let flags = CopyFlags::from_bits(connection.read_uint()?);

    let identified = current && level > 2;
    let block = if identified {
        Some(IdentityBlock::read(connection)?)
    } else {
        None
    };
    let (request_pool, source_pool) = if identified {
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

    let to_file = router.resolve(&to_file, &[&request_pool, &source_pool]);
    let path = PathBuf::from(&to_file);
    let exists = path.exists();
    if (flags.contains(CopyFlags::FAIL_IF_EXISTS) && exists)
        || (flags.contains(CopyFlags::FAIL_IF_NEW) && !exists)
    {
        return connection.write_result(ReturnCode::FileOpenError, &to_file);
    }

    let Some(lease) = router.copies().register(CopyTicket {
        name: path.clone(),
        machine: from_machine.clone(),
        direction: Direction::To,
        kind: EntryKind::File,
        mode: requested,
        size: 0,
    }) else {
        return connection.write_result(
            ReturnCode::FileWriteError,
            &format!(
                "Cannot write to file {to_file} at the same time this request is reading \
                 from it or if another copy request is currently reading or writing the file."
            ),
        );
    };
    let mut target = match TargetFile::create(&path, &lease) {
        Ok(target) => target,
        Err(error) => {
            warn!(target: COPY_TARGET, file = %to_file, error = %error, "cannot open target file");
            return connection.write_result(ReturnCode::FileOpenError, &to_file);
        }
    };
    connection.write_result(ReturnCode::Ok, "")?;

    let mut new_eol = eol::native().to_owned();
    if text {
        new_eol = eol::resolve(&connection.read_string()?);
        connection.write_uint(CONTINUE_COPY)?;
        connection.write_string(&new_eol)?;
        text = TransferMode::from_wire(connection.read_uint()?) == TransferMode::TextNoConvert;
    }
    let codepage = Codepage::for_label(&router.settings().codepage());
    if convert {
        connection.write_string(codepage.name())?;
        convert = TransferMode::from_wire(connection.read_uint()?) == TransferMode::TextConvert;
    }

    let mode = if convert {
        TransferMode::TextConvert
    } else if text {
        TransferMode::TextNoConvert
    } else {
        TransferMode::Binary
    };
    lease.set_mode(mode);
    let rc = match mode {
        TransferMode::TextConvert => receive_converted(connection, &mut target, &new_eol, codepage)?,
        TransferMode::TextNoConvert => receive_text(connection, &mut target, &new_eol)?,
        TransferMode::Binary if current => {
            let length = connection.read_uint()?;
            lease.set_size(u64::from(length));
            receive_sized_binary(connection, &mut target, length)?
        }
        TransferMode::Binary => receive_acked_chunks(connection, &mut target, &to_file)?,
    };
    if let Err(error) = connection.write_rc(rc) {
        debug!(target: COPY_TARGET, file = %to_file, error = %error, "final copy status not delivered");
    }
    debug!(
        target: COPY_TARGET,
        file = %to_file,
        from = %from_machine,
        mode = mode.as_str(),
        rc = %rc,
        "file received"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;
    use tempfile::TempDir;

    use stafd_config::SocketEndpoint;

    use super::*;
    use crate::copy::test_support::Duplex;
    use crate::router::test_support::router;
    use crate::transport::SocketProvider;

    fn provider() -> SocketProvider {
        SocketProvider::local(&SocketEndpoint::tcp("127.0.0.1", 6500))
    }

    fn legacy_request(to_file: &str, flags: u32, chunks: &[&[u8]]) -> Vec<u8> {
        let mut script = Vec::new();
        script.write_string("sender.example.com").expect("encode");
        script.write_string("local").expect("encode");
        script.write_string(to_file).expect("encode");
        script.write_uint(flags).expect("encode");
        for chunk in chunks {
            script
                .write_uint(u32::try_from(chunk.len()).expect("chunk fits"))
                .expect("encode");
            script.write_bytes(chunk).expect("encode");
        }
        script.write_uint(0).expect("encode");
        script
    }

    #[rstest]
    fn legacy_binary_files_are_written_and_acknowledged() {
        let router = router(5);
        let dir = TempDir::new().expect("dir");
        let target = dir.path().join("copied.bin");
        let provider = provider();
        let peer = Peer {
            provider: &provider,
            logical_id: "sender.example.com",
            physical_id: "10.0.0.3",
        };
        let script = legacy_request(&target.display().to_string(), 0, &[b"abc".as_slice(), b"defg".as_slice()]);
        let mut connection = Duplex::replying(script);
        receive_file(&router, &mut connection, &peer, FileApi::Legacy, 0).expect("receive");

        assert_eq!(std::fs::read(&target).expect("read back"), b"abcdefg");
        let mut replies = connection.written();
        assert_eq!(replies.read_rc().expect("ack"), ReturnCode::Ok);
        assert_eq!(replies.read_string().expect("ack"), "");
        assert_eq!(replies.read_uint().expect("chunk ack"), 0);
        assert_eq!(replies.read_uint().expect("chunk ack"), 0);
        assert_eq!(replies.read_rc().expect("final"), ReturnCode::Ok);
        assert_eq!(router.copies().len(), 0);
    }

    #[rstest]
    #[case(CopyFlags::FAIL_IF_EXISTS.bits(), true)]
    #[case(CopyFlags::FAIL_IF_NEW.bits(), false)]
    fn existence_flags_refuse_the_copy(#[case] flags: u32, #[case] create_first: bool) {
        let router = router(5);
        let dir = TempDir::new().expect("dir");
        let target = dir.path().join("target.txt");
        if create_first {
            std::fs::write(&target, b"keep").expect("seed");
        }
        let provider = provider();
        let peer = Peer {
            provider: &provider,
            logical_id: "sender.example.com",
            physical_id: "10.0.0.3",
        };
        let name = target.display().to_string();
        let mut connection = Duplex::replying(legacy_request(&name, flags, &[]));
        receive_file(&router, &mut connection, &peer, FileApi::Legacy, 0).expect("receive");
        let mut replies = connection.written();
        assert_eq!(replies.read_rc().expect("ack"), ReturnCode::FileOpenError);
        assert_eq!(replies.read_string().expect("ack"), name);
    }

    #[rstest]
    fn untrusted_senders_are_refused_before_touching_disk() {
        let router = router(2);
        let dir = TempDir::new().expect("dir");
        let target = dir.path().join("never.bin");
        let provider = provider();
        let peer = Peer {
            provider: &provider,
            logical_id: "sender.example.com",
            physical_id: "10.0.0.3",
        };
        let mut connection = Duplex::replying(legacy_request(
            &target.display().to_string(),
            0,
            &[b"data".as_slice()],
        ));
        receive_file(&router, &mut connection, &peer, FileApi::Legacy, 0).expect("receive");
        assert_eq!(
            connection.written().read_rc().expect("ack"),
            ReturnCode::AccessDenied
        );
        assert!(!target.exists());
    }

    #[rstest]
    fn variables_in_the_target_resolve_against_the_sent_pools() {
        let router = router(5);
        let dir = TempDir::new().expect("dir");
        let provider = provider();
        let peer = Peer {
            provider: &provider,
            logical_id: "sender.example.com",
            physical_id: "10.0.0.3",
        };
        let mut script = Vec::new();
        script.write_uint(TransferMode::Binary.to_wire()).expect("encode");
        script.write_string("sender.example.com").expect("encode");
        script.write_string("local://local").expect("encode");
        script.write_string("{dest}/out.bin").expect("encode");
        script.write_uint(0).expect("encode");
        IdentityBlock {
            handle: 9,
            authentication: crate::handles::Authentication::anonymous(),
            interface: "local".to_owned(),
            logical_id: "local".to_owned(),
            physical_id: "local".to_owned(),
            origin_uuid: "elsewhere".to_owned(),
            source_uuid: "elsewhere".to_owned(),
        }
        .write(&mut script)
        .expect("encode");
        script
            .write_pairs(&[("dest".to_owned(), dir.path().display().to_string())])
            .expect("encode");
        script.write_pairs(&[]).expect("encode");
        script.write_uint(2).expect("encode");
        script.write_bytes(b"hi").expect("encode");

        let mut connection = Duplex::replying(script);
        receive_file(&router, &mut connection, &peer, FileApi::Current, 3).expect("receive");
        assert_eq!(
            std::fs::read(dir.path().join("out.bin")).expect("read back"),
            b"hi"
        );
        let mut replies = Cursor::new(connection.outbound);
        assert_eq!(replies.read_rc().expect("ack"), ReturnCode::Ok);
    }
}
