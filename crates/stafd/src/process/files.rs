//! The lock, PID and health files kept beside the `local` socket.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

use stafd_config::RuntimePaths;

use super::errors::LaunchError;

/// One of the files a running daemon owns in its runtime directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFile {
    /// Exclusive lock taken for the lifetime of the daemon.
    Lock,
    /// Process identifier of the daemon.
    Pid,
    /// JSON health snapshot.
    Health,
}

impl RuntimeFile {
    pub(super) const ALL: [Self; 3] = [Self::Lock, Self::Pid, Self::Health];

    pub(super) fn path(self, paths: &RuntimePaths) -> &Path {
        match self {
            Self::Lock => paths.lock_path(),
            Self::Pid => paths.pid_path(),
            Self::Health => paths.health_path(),
        }
    }

    /// Replaces the file's contents so readers see the old or the new
    /// payload, never a partial one.
    pub(super) fn replace(self, paths: &RuntimePaths, contents: &[u8]) -> Result<(), LaunchError> {
        let path = self.path(paths);
        persist(path, contents).map_err(|source| self.failed("write", path, source))
    }

    /// Removes the file; a file that is already gone is not an error.
    pub(super) fn discard(self, paths: &RuntimePaths) -> Result<(), LaunchError> {
        let path = self.path(paths);
        match fs::remove_file(path) {
            Err(source) if source.kind() != io::ErrorKind::NotFound => {
                Err(self.failed("remove", path, source))
            }
            _ => Ok(()),
        }
    }

    pub(super) fn failed(self, action: &'static str, path: &Path, source: io::Error) -> LaunchError {
        LaunchError::RuntimeFile {
            file: self,
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for RuntimeFile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Lock => "lock",
            Self::Pid => "pid",
            Self::Health => "health",
        })
    }
}

fn persist(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "runtime file has no directory"))?;
    let mut builder = Builder::new();
    builder.prefix(".stafd");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o600));
    }
    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
