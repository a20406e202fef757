//! Process supervision world: runs the launch sequence with injected
//! daemonizer and shutdown doubles against a throwaway runtime directory.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use stafd_config::RuntimePaths;

use crate::bootstrap::ConfigLoader;
use crate::health::HealthReporter;
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::process::launch::{LaunchPlan, ProcessControl, ServiceDeps, run_daemon_with};
use crate::process::shutdown::{ShutdownError, ShutdownLatch, ShutdownSignal};
use crate::process::{LaunchError, LaunchMode, test_support};

use super::{Client, FailingConfigLoader, RecordingHealthReporter, TestConfigLoader};

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub type StepResult = Result<(), String>;

type LaunchResult = Result<(), LaunchError>;

pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    reporter: Arc<RecordingHealthReporter>,
    daemonizer: TestDaemonizer,
    shutdown: TestShutdownSignal,
    running: Option<thread::JoinHandle<LaunchResult>>,
    result: Option<LaunchResult>,
    seen: RefCell<Vec<String>>,
}

impl ProcessTestWorld {
    pub fn new() -> Self {
        let world = Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemonizer: TestDaemonizer::default(),
            shutdown: TestShutdownSignal::default(),
            running: None,
            result: None,
            seen: RefCell::new(Vec::new()),
        };
        test_support::clear_health_events(&world.health_path());
        world
    }

    fn plan<L: ConfigLoader>(
        &self,
        mode: LaunchMode,
        loader: L,
        shutdown: TestShutdownSignal,
    ) -> LaunchPlan<L, TestDaemonizer, TestShutdownSignal> {
        let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
        LaunchPlan {
            process: ProcessControl {
                mode,
                daemonizer: self.daemonizer.clone(),
                shutdown,
            },
            services: ServiceDeps { loader, reporter },
        }
    }

    /// Launches on a worker thread; the run ends when shutdown is triggered.
    pub fn start_background(&mut self) -> StepResult {
        if self.running.is_some() {
            return Err("daemon already running".to_owned());
        }
        self.seen.borrow_mut().clear();
        let plan = self.plan(LaunchMode::Background, self.loader.clone(), self.shutdown.clone());
        self.running = Some(thread::spawn(move || run_daemon_with(plan)));
        Ok(())
    }

    /// Runs to completion on the calling thread. With `pretrigger` the
    /// shutdown signal fires as soon as the daemon waits for it.
    pub fn start_foreground(&mut self, mode: LaunchMode, pretrigger: bool) -> StepResult {
        let shutdown = TestShutdownSignal::default();
        if pretrigger {
            shutdown.trigger();
        }
        let plan = self.plan(mode, self.loader.clone(), shutdown);
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn start_foreground_with_invalid_config(&mut self) -> StepResult {
        let plan = self.plan(
            LaunchMode::Foreground,
            FailingConfigLoader,
            TestShutdownSignal::default(),
        );
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn join_background(&mut self) -> StepResult {
        let running = self.running.take().ok_or("daemon not running")?;
        let result = running
            .join()
            .map_err(|_| "daemon thread panicked".to_owned())?;
        self.result = Some(result);
        Ok(())
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn local_client(&self) -> Client<'_> {
        Client::Local(self.loader.socket_path_ref())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("stafd.lock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("stafd.pid")
    }

    pub fn health_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("stafd.health")
    }

    pub fn lock_exists(&self) -> bool {
        self.lock_path().exists()
    }

    pub fn write_stale_runtime(&self) -> StepResult {
        fs::write(self.lock_path(), b"").map_err(|error| error.to_string())?;
        fs::write(self.pid_path(), b"0\n").map_err(|error| error.to_string())
    }

    pub fn read_health(&self) -> Result<Value, String> {
        let content = fs::read_to_string(self.health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    pub fn read_pid(&self) -> Result<Option<u32>, String> {
        match fs::read_to_string(self.pid_path()) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => text.trim().parse().map(Some).map_err(|error| format!("{error}")),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.to_string()),
        }
    }

    /// Polls the health file until it reports `expected`.
    pub fn wait_for_status(&self, expected: &str) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(snapshot) = self.read_health() {
                let status = snapshot_status(&snapshot).to_owned();
                let matched = status == expected;
                self.seen.borrow_mut().push(status);
                if matched {
                    return Ok(());
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(format!("daemon did not publish {expected} health snapshot"))
    }

    /// Whether `expected` was ever written, including transient states.
    pub fn saw_status(&self, expected: &str) -> bool {
        self.seen.borrow().iter().any(|status| status == expected)
            || test_support::health_events(&self.health_path())
                .iter()
                .any(|status| status == expected)
    }

    pub fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls.load(Ordering::SeqCst)
    }

    pub fn last_result(&self) -> Option<&LaunchResult> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessTestWorld {
    fn drop(&mut self) {
        self.trigger_shutdown();
        if let Some(running) = self.running.take()
            && running.join().is_err()
        {
            tracing::warn!("daemon thread panicked during teardown");
        }
    }
}

#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Raised by hand from a step; a `SHUTDOWN` request reaching the daemon
/// trips the latch and ends the wait as well.
#[derive(Clone, Default)]
pub struct TestShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl TestShutdownSignal {
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self, latch: &ShutdownLatch) -> Result<(), ShutdownError> {
        while !self.triggered.load(Ordering::SeqCst) && !latch.wait_for(POLL_INTERVAL) {}
        Ok(())
    }
}

pub fn snapshot_status(snapshot: &Value) -> &str {
    snapshot
        .get("status")
        .and_then(Value::as_str)
        .expect("health snapshot should contain a status field")
}
