//! Line-ending detection and rewriting for text transfers.

use std::io::{self, Read};

use staf_proto::copy::EOL_SCAN_BYTES;

pub(crate) const WINDOWS_EOL: &str = "\r\n";
pub(crate) const UNIX_EOL: &str = "\n";

/// Line ending of the host operating system.
pub(crate) fn native() -> &'static str {
    if cfg!(windows) { WINDOWS_EOL } else { UNIX_EOL }
}

/// Resolves a line-ending name: `native`, `windows`, `unix`, or a literal.
pub(crate) fn resolve(spec: &str) -> String {
    if spec.eq_ignore_ascii_case("native") {
        native().to_owned()
    } else if spec.eq_ignore_ascii_case("windows") {
        WINDOWS_EOL.to_owned()
    } else if spec.eq_ignore_ascii_case("unix") {
        UNIX_EOL.to_owned()
    } else {
        spec.to_owned()
    }
}

/// Finds the line ending used by `reader` from its first
/// [`EOL_SCAN_BYTES`] bytes.
///
/// The first line feed decides: preceded by a carriage return it is a
/// Windows ending, otherwise a Unix one. Without any line feed in the
/// prefix, `fallback` is returned.
pub(crate) fn detect<R: Read>(reader: R, fallback: &str) -> io::Result<String> {
    let mut prefix = Vec::with_capacity(EOL_SCAN_BYTES);
    reader
        .take(u64::try_from(EOL_SCAN_BYTES).unwrap_or(u64::MAX))
        .read_to_end(&mut prefix)?;
    let found = prefix.iter().position(|byte| *byte == b'\n').map(|index| {
        if index > 0 && prefix.get(index - 1) == Some(&b'\r') {
            WINDOWS_EOL
        } else {
            UNIX_EOL
        }
    });
    Ok(found.unwrap_or(fallback).to_owned())
}

/// Streaming replacement of one line ending with another.
///
/// Chunks may split an ending across a boundary; the unmatched tail is kept
/// and re-examined with the next chunk.
#[derive(Debug)]
pub(crate) struct EolRewriter {
    from: Vec<u8>,
    to: Vec<u8>,
    carry: Vec<u8>,
}

impl EolRewriter {
    pub(crate) fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.as_bytes().to_vec(),
            to: to.as_bytes().to_vec(),
            carry: Vec::new(),
        }
    }

    /// Rewrites `chunk`, returning the bytes that are safe to write.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);
        if self.from.is_empty() {
            return input;
        }
        let mut output = Vec::with_capacity(input.len() + input.len() / 2);
        let mut index = 0;
        while index < input.len() {
            let rest = input.get(index..).unwrap_or_default();
            if rest.starts_with(&self.from) {
                output.extend_from_slice(&self.to);
                index += self.from.len();
            } else if self.from.starts_with(rest) {
                self.carry = rest.to_vec();
                break;
            } else {
                output.extend(rest.first());
                index += 1;
            }
        }
        output
    }

    /// Returns any tail held back at the end of the stream.
    pub(crate) fn finish(self) -> Vec<u8> {
        self.carry
    }
}

/// Splits a byte stream into chunks that end on a line boundary.
///
/// Each chunk holds one or more whole lines. A line longer than the buffer
/// doubles the buffer until the line fits. The final chunk may lack a
/// trailing line ending.
#[derive(Debug)]
pub(crate) struct LineChunks<R> {
    reader: R,
    eol: Vec<u8>,
    buffer: Vec<u8>,
    capacity: usize,
    done: bool,
}

impl<R: Read> LineChunks<R> {
    pub(crate) fn new(reader: R, eol: &str, capacity: usize) -> Self {
        Self {
            reader,
            eol: eol.as_bytes().to_vec(),
            buffer: Vec::new(),
            capacity: capacity.max(1),
            done: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut scratch = vec![0_u8; self.capacity.saturating_sub(self.buffer.len()).max(1)];
        while self.buffer.len() < self.capacity {
            let read = self.reader.read(&mut scratch)?;
            if read == 0 {
                self.done = true;
                break;
            }
            self.buffer.extend(scratch.iter().take(read));
        }
        Ok(())
    }

    fn last_boundary(&self) -> Option<usize> {
        if self.eol.is_empty() || self.buffer.len() < self.eol.len() {
            return None;
        }
        (0..=self.buffer.len() - self.eol.len())
            .rev()
            .find(|start| self.buffer.get(*start..*start + self.eol.len()) == Some(self.eol.as_slice()))
            .map(|start| start + self.eol.len())
    }
}

impl<R: Read> Iterator for LineChunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.done && let Err(error) = self.fill() {
                return Some(Err(error));
            }
            if let Some(end) = self.last_boundary() {
                let rest = self.buffer.split_off(end);
                return Some(Ok(std::mem::replace(&mut self.buffer, rest)));
            }
            if self.done {
                if self.buffer.is_empty() {
                    return None;
                }
                return Some(Ok(std::mem::take(&mut self.buffer)));
            }
            self.capacity = self.capacity.saturating_mul(2);
        }
    }
}
