//! In-memory streams for driving one side of a copy conversation.

use std::cell::RefCell;
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;

/// Reads come from a scripted reply buffer; writes are captured.
#[derive(Debug)]
pub(crate) struct Duplex {
    inbound: Cursor<Vec<u8>>,
    pub(crate) outbound: Vec<u8>,
}

impl Duplex {
    pub(crate) fn replying(replies: Vec<u8>) -> Self {
        Self {
            inbound: Cursor::new(replies),
            outbound: Vec::new(),
        }
    }

    /// Cursor over everything written so far.
    pub(crate) fn written(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.outbound.clone())
    }
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inbound.read(buf)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A [`Duplex`] whose captured writes stay readable after the stream is
/// boxed and handed away.
#[derive(Debug)]
pub(crate) struct Tapped {
    inbound: Cursor<Vec<u8>>,
    outbound: Rc<RefCell<Vec<u8>>>,
}

impl Tapped {
    pub(crate) fn replying(replies: Vec<u8>) -> (Self, Rc<RefCell<Vec<u8>>>) {
        let outbound = Rc::new(RefCell::new(Vec::new()));
        let stream = Self {
            inbound: Cursor::new(replies),
            outbound: Rc::clone(&outbound),
        };
        (stream, outbound)
    }
}

impl Read for Tapped {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inbound.read(buf)
    }
}

impl Write for Tapped {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
