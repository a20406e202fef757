//! File reads and writes with bounded retries.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::warn;

use super::COPY_TARGET;

/// How often a failing disk operation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) attempts: u32,
    pub(crate) delay: Duration,
}

impl RetryPolicy {
    pub(crate) const DISK: Self = Self {
        attempts: 20,
        delay: Duration::from_millis(500),
    };
}

/// Source file read in chunks.
///
/// A failed read is retried after a delay; before the final attempt the file
/// is reopened and repositioned.
#[derive(Debug)]
pub(crate) struct SourceFile {
    file: File,
    path: PathBuf,
    position: u64,
    policy: RetryPolicy,
}

impl SourceFile {
    pub(crate) fn open(path: &Path, policy: RetryPolicy) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            path: path.to_path_buf(),
            position: 0,
            policy,
        })
    }

    pub(crate) fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Fills `buffer` unless the end of the file is reached first. Returns
    /// the number of bytes read.
    pub(crate) fn read_chunk(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        fill(self, buffer)
    }

    fn read_once(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let read = self.file.read(buffer)?;
        self.position += u64::try_from(read).unwrap_or(u64::MAX);
        Ok(read)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.position))?;
        self.file = file;
        Ok(())
    }

    /// Rewinds so the file can be read again from the start.
    pub(crate) fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.position = 0;
        Ok(())
    }
}

impl Read for SourceFile {
    /// Reads once, retrying failures per the policy. Before the final attempt
    /// the file is reopened at the current position.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut attempt = 1;
        loop {
            match self.read_once(buf) {
                Ok(read) => return Ok(read),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if attempt < self.policy.attempts => {
                    warn!(
                        target: COPY_TARGET,
                        file = %self.path.display(),
                        attempt,
                        position = self.position,
                        error = %error,
                        "file read failed; retrying"
                    );
                    thread::sleep(self.policy.delay);
                    attempt += 1;
                    if attempt == self.policy.attempts {
                        self.reopen()?;
                    } else {
                        self.file.seek(SeekFrom::Start(self.position))?;
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn fill<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while let Some(rest) = buffer.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        match reader.read(rest) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}

/// Writes all of `bytes`, retrying per `policy`.
pub(crate) fn write_chunk<W: Write>(
    writer: &mut W,
    bytes: &[u8],
    path: &Path,
    policy: RetryPolicy,
) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        match writer.write_all(bytes) {
            Ok(()) => return Ok(()),
            Err(error) if attempt < policy.attempts => {
                warn!(
                    target: COPY_TARGET,
                    file = %path.display(),
                    attempt,
                    error = %error,
                    "file write failed; retrying"
                );
                thread::sleep(policy.delay);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;

    const QUICK: RetryPolicy = RetryPolicy {
        attempts: 3,
        delay: Duration::ZERO,
    };

    struct Flaky {
        failures: Cell<u32>,
        written: Vec<u8>,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(io::Error::other("disk busy"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    fn writes_retry_up_to_the_limit(#[case] failures: u32, #[case] succeeds: bool) {
        let mut sink = Flaky {
            failures: Cell::new(failures),
            written: Vec::new(),
        };
        let outcome = write_chunk(&mut sink, b"payload", Path::new("/tmp/x"), QUICK);
        assert_eq!(outcome.is_ok(), succeeds);
        if succeeds {
            assert_eq!(sink.written, b"payload");
        }
    }

    #[rstest]
    fn chunks_fill_until_end_of_file() {
        let mut temp = NamedTempFile::new().expect("temp file");
        temp.write_all(&[7_u8; 10]).expect("write");
        let mut source = SourceFile::open(temp.path(), QUICK).expect("open");
        assert_eq!(source.len().expect("len"), 10);
        let mut buffer = [0_u8; 4];
        let sizes: Vec<usize> = std::iter::from_fn(|| {
            let read = source.read_chunk(&mut buffer).expect("read");
            (read > 0).then_some(read)
        })
        .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        source.rewind().expect("rewind");
        assert_eq!(source.read_chunk(&mut buffer).expect("read"), 4);
    }
}
