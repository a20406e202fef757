//! Byte-moving halves of the copy sub-protocols.
//!
//! Each mode has a sending and a receiving function that must agree on the
//! frames exchanged:
//!
//! - sized binary: the length, raw chunks, then the receiver's return code;
//! - stepped binary: the length, then per chunk a sender code, the bytes and
//!   a receiver code;
//! - acknowledged chunks: length-prefixed chunks each acknowledged, ended by
//!   a zero length;
//! - text: the sender's line ending, the chunk size, length-prefixed chunks
//!   ended by [`FINISHED_COPY`], then the receiver's return code;
//! - converted text: the sender's line ending, then strings each preceded by
//!   [`CONTINUE_COPY`], ended by [`FINISHED_COPY`] and the return code.
//!
//! A local write failure never breaks framing: the receiver keeps draining
//! the stream and reports the failure in its return code.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use staf_proto::copy::{BINARY_CHUNK, CONTINUE_COPY, CONVERT_BUFFER, FINISHED_COPY, TEXT_CHUNK};
use staf_proto::{ReadWire, ReturnCode, WireError, WriteWire};

use super::COPY_TARGET;
use super::codepage::Codepage;
use super::disk::{RetryPolicy, SourceFile, write_chunk};
use super::eol::{EolRewriter, LineChunks};
use super::registry::CopyLease;

/// Why the sending half stopped.
#[derive(Debug, Error)]
pub(crate) enum CopyFault {
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The source could not be read after its length was announced; the
    /// stream can no longer be framed and the connection must be dropped.
    #[error("source read failed mid-transfer: {0}")]
    Source(#[source] io::Error),
}

/// Destination file of an inbound transfer.
#[derive(Debug)]
pub(crate) struct TargetFile<'a> {
    file: File,
    path: PathBuf,
    policy: RetryPolicy,
    lease: &'a CopyLease<'a>,
    failed: bool,
}

impl<'a> TargetFile<'a> {
    /// Creates or truncates `path`.
    pub(crate) fn create(path: &Path, lease: &'a CopyLease<'a>) -> io::Result<Self> {
        Self::with_policy(path, lease, RetryPolicy::DISK)
    }

    pub(crate) fn with_policy(
        path: &Path,
        lease: &'a CopyLease<'a>,
        policy: RetryPolicy,
    ) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            path: path.to_path_buf(),
            policy,
            lease,
            failed: false,
        })
    }

    /// Writes `bytes` unless an earlier write already failed.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> ReturnCode {
        if self.failed {
            return ReturnCode::FileWriteError;
        }
        if bytes.is_empty() {
            return ReturnCode::Ok;
        }
        match write_chunk(&mut self.file, bytes, &self.path, self.policy) {
            Ok(()) => {
                self.lease
                    .advance(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
                ReturnCode::Ok
            }
            Err(error) => {
                warn!(
                    target: COPY_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "giving up writing file"
                );
                self.failed = true;
                ReturnCode::FileWriteError
            }
        }
    }

    pub(crate) fn rc(&self) -> ReturnCode {
        if self.failed {
            ReturnCode::FileWriteError
        } else {
            ReturnCode::Ok
        }
    }
}

fn chunk_len(left: u32, limit: u32) -> u32 {
    left.min(limit)
}

/// Buffer length for a wire chunk of `len` bytes.
fn buffer_len(len: u32) -> usize {
    usize::try_from(len).unwrap_or(usize::MAX)
}

fn byte_count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// Receives `length` raw bytes. The caller writes the returned code.
pub(crate) fn receive_sized_binary<C: Read + ?Sized>(
    connection: &mut C,
    target: &mut TargetFile<'_>,
    length: u32,
) -> Result<ReturnCode, WireError> {
    let mut left = length;
    while left > 0 {
        let size = chunk_len(left, BINARY_CHUNK);
        let bytes = connection.read_bytes(size)?;
        target.write(&bytes);
        left -= size;
    }
    Ok(target.rc())
}

/// Receives `length` bytes in individually acknowledged steps.
pub(crate) fn receive_stepped_binary<C: Read + Write + ?Sized>(
    connection: &mut C,
    target: &mut TargetFile<'_>,
    length: u32,
) -> Result<(), WireError> {
    let mut left = length;
    while left > 0 {
        if !connection.read_rc()?.is_ok() {
            break;
        }
        let size = chunk_len(left, BINARY_CHUNK);
        let bytes = connection.read_bytes(size)?;
        let rc = target.write(&bytes);
        connection.write_rc(rc)?;
        if !rc.is_ok() {
            break;
        }
        left -= size;
    }
    Ok(())
}

/// Receives zero-terminated acknowledged chunks. A failed write is reported
/// with `name` and ends the transfer.
pub(crate) fn receive_acked_chunks<C: Read + Write + ?Sized>(
    connection: &mut C,
    target: &mut TargetFile<'_>,
    name: &str,
) -> Result<ReturnCode, WireError> {
    loop {
        let len = connection.read_uint()?;
        if len == 0 {
            break;
        }
        let bytes = connection.read_bytes(len)?;
        let rc = target.write(&bytes);
        if rc.is_ok() {
            connection.write_uint(0)?;
        } else {
            connection.write_result(rc, name)?;
            break;
        }
    }
    Ok(target.rc())
}

/// Receives text chunks, replacing the sender's line ending with `new_eol`.
pub(crate) fn receive_text<C: Read + ?Sized>(
    connection: &mut C,
    target: &mut TargetFile<'_>,
    new_eol: &str,
) -> Result<ReturnCode, WireError> {
    let current_eol = connection.read_string()?;
    let _chunk_size = connection.read_uint()?;
    let mut rewriter = EolRewriter::new(&current_eol, new_eol);
    loop {
        let len = connection.read_uint()?;
        if len == FINISHED_COPY {
            break;
        }
        let bytes = connection.read_bytes(len)?;
        target.write(&rewriter.push(&bytes));
    }
    target.write(&rewriter.finish());
    Ok(target.rc())
}

/// Receives whole-line strings and encodes them in `codepage`.
pub(crate) fn receive_converted<C: Read + ?Sized>(
    connection: &mut C,
    target: &mut TargetFile<'_>,
    new_eol: &str,
    codepage: Codepage,
) -> Result<ReturnCode, WireError> {
    let current_eol = connection.read_string()?;
    while connection.read_uint()? != FINISHED_COPY {
        let text = connection.read_string()?;
        let text = if current_eol.is_empty() || current_eol == new_eol {
            text
        } else {
            text.replace(&current_eol, new_eol)
        };
        target.write(&codepage.encode(&text));
    }
    Ok(target.rc())
}

/// Sends `length` raw bytes, then reads the receiver's code.
pub(crate) fn send_sized_binary<C: Read + Write + ?Sized>(
    connection: &mut C,
    source: &mut SourceFile,
    length: u32,
    lease: &CopyLease<'_>,
) -> Result<ReturnCode, CopyFault> {
    connection.write_uint(length)?;
    let mut buffer = vec![0_u8; buffer_len(BINARY_CHUNK)];
    let mut left = length;
    while left > 0 {
        let size = buffer_len(chunk_len(left, BINARY_CHUNK));
        let chunk = buffer.get_mut(..size).unwrap_or_default();
        let read = source.read_chunk(chunk).map_err(CopyFault::Source)?;
        if read < size {
            return Err(CopyFault::Source(io::ErrorKind::UnexpectedEof.into()));
        }
        connection.write_bytes(chunk)?;
        lease.advance(byte_count(size));
        left -= chunk_len(left, BINARY_CHUNK);
    }
    Ok(connection.read_rc()?)
}

/// Sends `length` bytes in acknowledged steps. A local read failure is
/// announced to the receiver and returned as `FileReadError`.
pub(crate) fn send_stepped_binary<C: Read + Write + ?Sized>(
    connection: &mut C,
    source: &mut SourceFile,
    length: u32,
    lease: &CopyLease<'_>,
) -> Result<ReturnCode, WireError> {
    connection.write_uint(length)?;
    let mut buffer = vec![0_u8; buffer_len(BINARY_CHUNK)];
    let mut left = length;
    while left > 0 {
        let size = buffer_len(chunk_len(left, BINARY_CHUNK));
        let chunk = buffer.get_mut(..size).unwrap_or_default();
        match source.read_chunk(chunk) {
            Ok(read) if read == size => {}
            _ => {
                connection.write_rc(ReturnCode::FileReadError)?;
                return Ok(ReturnCode::FileReadError);
            }
        }
        connection.write_rc(ReturnCode::Ok)?;
        connection.write_bytes(chunk)?;
        let ack = connection.read_rc()?;
        if !ack.is_ok() {
            return Ok(ack);
        }
        lease.advance(byte_count(size));
        left -= chunk_len(left, BINARY_CHUNK);
    }
    Ok(ReturnCode::Ok)
}

/// Sends acknowledged chunks until end of file, then the zero terminator.
///
/// Returns the first failing acknowledgement, or the receiver's final code.
pub(crate) fn send_acked_chunks<C: Read + Write + ?Sized>(
    connection: &mut C,
    source: &mut SourceFile,
    lease: &CopyLease<'_>,
) -> Result<ReturnCode, WireError> {
    let mut buffer = vec![0_u8; buffer_len(BINARY_CHUNK)];
    let mut outcome = ReturnCode::Ok;
    loop {
        let read = match source.read_chunk(&mut buffer) {
            Ok(read) => read,
            Err(_) => {
                outcome = ReturnCode::FileReadError;
                0
            }
        };
        let Some(chunk) = buffer.get(..read).filter(|chunk| !chunk.is_empty()) else {
            break;
        };
        connection.write_uint(u32::try_from(read).unwrap_or(BINARY_CHUNK))?;
        connection.write_bytes(chunk)?;
        let ack = connection.read_uint()?;
        if ack != 0 {
            let _name = connection.read_string()?;
            return Ok(ReturnCode::from(ack));
        }
        lease.advance(byte_count(read));
    }
    connection.write_uint(0)?;
    match connection.read_rc() {
        Ok(rc) if outcome.is_ok() => Ok(rc),
        Ok(_) => Ok(outcome),
        Err(error) if error.is_closed() => Ok(outcome),
        Err(error) => Err(error),
    }
}

/// Sends the file as text chunks in the file's own line ending.
pub(crate) fn send_text<C: Read + Write + ?Sized>(
    connection: &mut C,
    source: &mut SourceFile,
    current_eol: &str,
    lease: &CopyLease<'_>,
) -> Result<ReturnCode, WireError> {
    connection.write_string(current_eol)?;
    connection.write_uint(TEXT_CHUNK)?;
    let mut buffer = vec![0_u8; buffer_len(TEXT_CHUNK)];
    let mut outcome = ReturnCode::Ok;
    loop {
        let read = match source.read_chunk(&mut buffer) {
            Ok(read) => read,
            Err(_) => {
                outcome = ReturnCode::FileReadError;
                break;
            }
        };
        let Some(chunk) = buffer.get(..read).filter(|chunk| !chunk.is_empty()) else {
            break;
        };
        connection.write_uint(u32::try_from(read).unwrap_or(TEXT_CHUNK))?;
        connection.write_bytes(chunk)?;
        lease.advance(byte_count(read));
    }
    connection.write_uint(FINISHED_COPY)?;
    let rc = connection.read_rc()?;
    Ok(if outcome.is_ok() { rc } else { outcome })
}

/// Sends the file as whole-line strings decoded from `codepage`.
pub(crate) fn send_converted<C: Read + Write + ?Sized>(
    connection: &mut C,
    source: &mut SourceFile,
    current_eol: &str,
    codepage: Codepage,
    lease: &CopyLease<'_>,
) -> Result<ReturnCode, WireError> {
    connection.write_string(current_eol)?;
    let mut outcome = ReturnCode::Ok;
    for chunk in LineChunks::new(&mut *source, current_eol, CONVERT_BUFFER) {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(_) => {
                outcome = ReturnCode::FileReadError;
                break;
            }
        };
        connection.write_uint(CONTINUE_COPY)?;
        connection.write_string(&codepage.decode(&chunk))?;
        lease.advance(byte_count(chunk.len()));
    }
    connection.write_uint(FINISHED_COPY)?;
    let rc = connection.read_rc()?;
    Ok(if outcome.is_ok() { rc } else { outcome })
}
