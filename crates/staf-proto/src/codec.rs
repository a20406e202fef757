//! Integer and string framing over byte streams.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::ReturnCode;

/// Payload cap applied until [`set_payload_limit`] is called.
pub const DEFAULT_PAYLOAD_LIMIT: u32 = 256 * 1024 * 1024;

static PAYLOAD_LIMIT: AtomicU32 = AtomicU32::new(DEFAULT_PAYLOAD_LIMIT);

/// Sets the largest payload length, in bytes, accepted from any peer.
///
/// The cap is process-wide: the daemon sets it once at bootstrap.
pub fn set_payload_limit(limit: u32) {
    PAYLOAD_LIMIT.store(limit, Ordering::Relaxed);
}

/// Largest payload length currently accepted from a peer.
#[must_use]
pub fn payload_limit() -> u32 {
    PAYLOAD_LIMIT.load(Ordering::Relaxed)
}

/// Errors raised while framing data on a connection.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the stream. This is the normal way a cooperating peer
    /// ends a conversation and is not a fault.
    #[error("connection closed by peer")]
    Closed,
    /// A read or write exceeded the connection timeout.
    #[error("connection timed out")]
    Timeout,
    /// Any other transport failure.
    #[error("connection I/O failed: {0}")]
    Io(#[source] io::Error),
    /// A string payload did not decode as UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[source] std::string::FromUtf8Error),
    /// A payload was longer than the 32-bit prefix or the payload cap allows.
    #[error("payload of {len} bytes exceeds the permitted length")]
    TooLarge {
        /// Length of the rejected payload.
        len: usize,
    },
    /// The buffer for an incoming payload could not be allocated.
    #[error("unable to allocate {len} bytes for an incoming payload")]
    Allocation {
        /// Length announced by the peer.
        len: u32,
    },
}

impl WireError {
    /// Returns `true` when the error represents an orderly end of stream.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` when the stream was intact but its content was not.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::InvalidUtf8(_) | Self::TooLarge { .. })
    }
}

/// Reserves a zeroed buffer for an announced payload of `len` bytes.
fn payload_buffer(len: u32, limit: u32) -> Result<Vec<u8>, WireError> {
    if len > limit {
        return Err(WireError::TooLarge {
            len: usize::try_from(len).unwrap_or(usize::MAX),
        });
    }
    let size = usize::try_from(len).map_err(|_| WireError::Allocation { len })?;
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| WireError::Allocation { len })?;
    buffer.resize(size, 0);
    Ok(buffer)
}

impl From<io::Error> for WireError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Closed,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(error),
        }
    }
}

/// Reading half of the wire framing, available on every [`Read`] type.
pub trait ReadWire: Read {
    /// Reads one network-order `u32`.
    #[expect(
        clippy::big_endian_bytes,
        reason = "the wire format is defined in network byte order"
    )]
    fn read_uint(&mut self) -> Result<u32, WireError> {
        let mut buffer = [0_u8; 4];
        self.read_exact(&mut buffer)?;
        Ok(u32::from_be_bytes(buffer))
    }

    /// Reads a return code.
    fn read_rc(&mut self) -> Result<ReturnCode, WireError> {
        self.read_uint().map(ReturnCode::from)
    }

    /// Reads exactly `len` raw bytes, refusing lengths above
    /// [`payload_limit`].
    fn read_bytes(&mut self, len: u32) -> Result<Vec<u8>, WireError> {
        let mut buffer = payload_buffer(len, payload_limit())?;
        self.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Reads a string whose byte length has already been consumed.
    fn read_string_of(&mut self, len: u32) -> Result<String, WireError> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(WireError::InvalidUtf8)
    }

    /// Reads a length-prefixed string.
    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_uint()?;
        self.read_string_of(len)
    }

    /// Reads a counted list of name/value pairs, as used for variable pools.
    fn read_pairs(&mut self) -> Result<Vec<(String, String)>, WireError> {
        let count = self.read_uint()?;
        let mut pairs = Vec::new();
        for _ in 0..count {
            let name = self.read_string()?;
            let value = self.read_string()?;
            pairs.push((name, value));
        }
        Ok(pairs)
    }
}

impl<R: Read + ?Sized> ReadWire for R {}

/// Writing half of the wire framing, available on every [`Write`] type.
pub trait WriteWire: Write {
    /// Writes one network-order `u32`.
    #[expect(
        clippy::big_endian_bytes,
        reason = "the wire format is defined in network byte order"
    )]
    fn write_uint(&mut self, value: u32) -> Result<(), WireError> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Writes a return code.
    fn write_rc(&mut self, rc: ReturnCode) -> Result<(), WireError> {
        self.write_uint(rc.code())
    }

    /// Writes raw bytes with no length prefix.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.write_all(bytes)?;
        Ok(())
    }

    /// Writes a length-prefixed string.
    fn write_string(&mut self, value: &str) -> Result<(), WireError> {
        let len = u32::try_from(value.len()).map_err(|_| WireError::TooLarge { len: value.len() })?;
        self.write_uint(len)?;
        self.write_bytes(value.as_bytes())
    }

    /// Writes a return code followed by its result string.
    fn write_result(&mut self, rc: ReturnCode, result: &str) -> Result<(), WireError> {
        self.write_rc(rc)?;
        self.write_string(result)
    }

    /// Writes a counted list of name/value pairs.
    fn write_pairs(&mut self, pairs: &[(String, String)]) -> Result<(), WireError> {
        let len = u32::try_from(pairs.len()).map_err(|_| WireError::TooLarge { len: pairs.len() })?;
        self.write_uint(len)?;
        for (name, value) in pairs {
            self.write_string(name)?;
            self.write_string(value)?;
        }
        Ok(())
    }
}

impl<W: Write + ?Sized> WriteWire for W {}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn integers_use_network_byte_order() {
        let mut buffer = Vec::new();
        buffer.write_uint(0x0102_0304).expect("write");
        assert_eq!(buffer, vec![1, 2, 3, 4]);
    }

    #[rstest]
    fn strings_are_prefixed_with_their_byte_length() {
        let mut buffer = Vec::new();
        buffer.write_string("héllo").expect("write");
        assert_eq!(buffer.get(..4), Some(&[0, 0, 0, 6][..]));
        let mut cursor = Cursor::new(buffer);
        assert_eq!(cursor.read_string().expect("read"), "héllo");
    }

    #[rstest]
    fn pairs_survive_the_wire() {
        let pairs = vec![
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), String::new()),
        ];
        let mut buffer = Vec::new();
        buffer.write_pairs(&pairs).expect("write");
        let mut cursor = Cursor::new(buffer);
        assert_eq!(cursor.read_pairs().expect("read"), pairs);
    }

    #[rstest]
    fn truncated_stream_reports_closed() {
        let mut cursor = Cursor::new(vec![0, 0]);
        let error = cursor.read_uint().expect_err("short read");
        assert!(error.is_closed());
    }

    #[rstest]
    fn invalid_utf8_is_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 2, 0xff, 0xfe]);
        assert!(matches!(
            cursor.read_string(),
            Err(WireError::InvalidUtf8(_))
        ));
    }

    #[rstest]
    fn announced_lengths_above_the_cap_are_refused() {
        assert!(matches!(
            payload_buffer(17, 16),
            Err(WireError::TooLarge { len: 17 })
        ));
        assert_eq!(payload_buffer(16, 16).map(|buffer| buffer.len()).ok(), Some(16));
    }

    #[rstest]
    fn hostile_lengths_fail_before_reserving() {
        let mut cursor = Cursor::new(vec![0xff, 0xff, 0xff, 0xff, b'x']);
        let error = cursor.read_string().expect_err("oversized");
        assert!(error.is_malformed(), "{error}");
    }

    #[rstest]
    #[case(io::ErrorKind::BrokenPipe, true)]
    #[case(io::ErrorKind::TimedOut, false)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    fn io_errors_are_classified(#[case] kind: io::ErrorKind, #[case] closed: bool) {
        let error = WireError::from(io::Error::from(kind));
        assert_eq!(error.is_closed(), closed);
    }
}
