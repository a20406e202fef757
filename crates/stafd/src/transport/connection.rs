//! A connected stream tagged with the peer's network identity.

use std::io::{self, Read, Write};
use std::time::Duration;

use super::{ConnectionProvider, ConnectionStream};

/// One conversation with a peer.
///
/// The logical identifier is the name the peer is known by; the physical
/// identifier is its address. Both feed trust decisions.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: ConnectionStream,
    logical_id: String,
    physical_id: String,
}

impl Connection {
    pub(crate) fn new(
        stream: ConnectionStream,
        logical_id: impl Into<String>,
        physical_id: impl Into<String>,
    ) -> Self {
        Self {
            stream,
            logical_id: logical_id.into(),
            physical_id: physical_id.into(),
        }
    }

    pub(crate) fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub(crate) fn physical_id(&self) -> &str {
        &self.physical_id
    }

    pub(crate) fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_timeout(timeout)
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// The far end of an inbound connection as trust checks see it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Peer<'a> {
    /// Provider the connection arrived on.
    pub(crate) provider: &'a dyn ConnectionProvider,
    pub(crate) logical_id: &'a str,
    pub(crate) physical_id: &'a str,
}

/// Any duplex byte stream a conversation can run over.
pub(crate) trait WireStream: Read + Write {}

impl<T: Read + Write + ?Sized> WireStream for T {}
