//! BDD test world: loader, reporter and the daemon produced by bootstrap.

use std::cell::RefCell;
use std::sync::Arc;

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, Interfaces, bootstrap_with};
use crate::transport::ListenerError;

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;

/// Scenario world shared across bootstrap steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
    interfaces: Option<Result<Interfaces, ListenerError>>,
}

impl TestWorld {
    /// Builds a world with a successful configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(TestConfigLoader::new())
    }

    /// Builds a world around a specific successful loader.
    #[must_use]
    pub fn with_loader(loader: TestConfigLoader) -> Self {
        Self {
            loader: Box::new(loader),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            bootstrap_error: None,
            interfaces: None,
        }
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
        self.reset_results();
    }

    /// Installs a loader that succeeds.
    pub fn use_successful_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader::new());
        self.reset_results();
    }

    /// Installs a loader whose configuration delegates `delegation`.
    pub fn use_delegating_loader(&mut self, delegation: &str) {
        self.loader = Box::new(TestConfigLoader::new().with_delegation(delegation));
        self.reset_results();
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.daemon.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        match bootstrap_with(&*self.loader, self.reporter.clone()) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Binds the daemon's interfaces.
    pub fn serve(&mut self) {
        if let Some(daemon) = self.daemon.as_ref() {
            self.interfaces = Some(daemon.serve());
        }
    }

    #[must_use]
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    #[must_use]
    pub fn daemon(&self) -> Option<&Daemon> {
        self.daemon.as_ref()
    }

    /// Whether [`Self::serve`] bound every interface.
    #[must_use]
    pub fn serving(&self) -> bool {
        matches!(self.interfaces, Some(Ok(_)))
    }

    fn reset_results(&mut self) {
        self.stop();
        self.daemon = None;
        self.bootstrap_error = None;
    }

    fn stop(&mut self) {
        if let Some(Ok(interfaces)) = self.interfaces.take() {
            interfaces.stop().expect("interfaces stop cleanly");
        }
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Default test world fixture.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
