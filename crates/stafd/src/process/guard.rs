//! Single-instance guard over the runtime directory.

use std::fs::{self, File, OpenOptions};
use std::io;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use stafd_config::RuntimePaths;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::RuntimeFile;
use crate::clock;

/// Owns the runtime files while the daemon runs and removes them on drop.
#[derive(Debug)]
pub(super) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
    instance: Option<String>,
}

impl ProcessGuard {
    pub(super) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = match create_lock(&paths) {
            Ok(lock) => lock,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                reclaim_stale_lock(&paths)?
            }
            Err(source) => return Err(RuntimeFile::Lock.failed("create", paths.lock_path(), source)),
        };
        info!(
            target: PROCESS_TARGET,
            file = %paths.lock_path().display(),
            "runtime lock acquired"
        );
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
            instance: None,
        })
    }

    pub(super) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        RuntimeFile::Pid.replace(&self.paths, format!("{pid}\n").as_bytes())?;
        self.pid = Some(pid);
        info!(target: PROCESS_TARGET, pid, "pid file written");
        Ok(())
    }

    /// Instance UUID reported in every later health snapshot.
    pub(super) fn set_instance(&mut self, instance: &str) {
        self.instance = Some(instance.to_owned());
    }

    pub(super) fn write_health(&self, status: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let snapshot = HealthSnapshot {
            status: status.as_str(),
            pid,
            instance: self.instance.as_deref(),
            timestamp: clock::now(),
        };
        let mut payload = serde_json::to_vec(&snapshot)?;
        payload.push(b'\n');
        RuntimeFile::Health.replace(&self.paths, &payload)?;
        #[cfg(test)]
        test_support::record(self.paths.health_path(), snapshot.status);
        info!(target: PROCESS_TARGET, status = snapshot.status, "health snapshot updated");
        Ok(())
    }

    pub(super) fn paths(&self) -> &RuntimePaths {
        &self.paths
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        for file in RuntimeFile::ALL {
            if let Err(error) = file.discard(&self.paths) {
                warn!(target: PROCESS_TARGET, %error, "runtime file left behind");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

impl HealthState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot<'a> {
    status: &'a str,
    pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance: Option<&'a str>,
    timestamp: String,
}

fn create_lock(paths: &RuntimePaths) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(paths.lock_path())
}

/// Takes over a lock whose owner is gone. A live owner wins.
fn reclaim_stale_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    let recorded = fs::read_to_string(paths.pid_path())
        .ok()
        .and_then(|text| text.trim().parse::<u32>().ok());
    if let Some(pid) = recorded
        && is_alive(pid)?
    {
        info!(target: PROCESS_TARGET, pid, "another daemon owns the runtime directory");
        return Err(LaunchError::AlreadyRunning { pid });
    }
    warn!(
        target: PROCESS_TARGET,
        lock = %paths.lock_path().display(),
        pid = ?recorded,
        "reclaiming stale runtime lock"
    );
    RuntimeFile::Lock.discard(paths)?;
    RuntimeFile::Pid.discard(paths)?;
    create_lock(paths).map_err(|source| RuntimeFile::Lock.failed("create", paths.lock_path(), source))
}

fn is_alive(pid: u32) -> Result<bool, LaunchError> {
    let raw = match i32::try_from(pid) {
        Ok(0) | Err(_) => return Ok(false),
        Ok(raw) => raw,
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH | Errno::ECHILD) => Ok(false),
        Err(errno) => Err(LaunchError::CheckProcess { pid, source: errno }),
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, false)]
    #[case(u32::MAX, false)]
    fn impossible_pids_are_not_alive(#[case] pid: u32, #[case] alive: bool) {
        assert_eq!(is_alive(pid).expect("liveness"), alive);
    }

    #[rstest]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()).expect("liveness"));
    }
}
