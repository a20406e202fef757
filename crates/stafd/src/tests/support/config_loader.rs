//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use stafd_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that places the `local` socket in a temporary directory and binds
/// the `tcp` interface to an ephemeral loopback port.
#[derive(Clone)]
pub struct TestConfigLoader {
    runtime_dir: Arc<TempDir>,
    socket_path: PathBuf,
    delegated_services: Vec<String>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary runtime directory");
        Self {
            socket_path: dir.path().join("stafd.sock"),
            runtime_dir: Arc::new(dir),
            delegated_services: Vec::new(),
        }
    }

    /// Adds a `NAME=machine[/SERVICE]` delegation to the loaded configuration.
    #[must_use]
    pub fn with_delegation(mut self, delegation: &str) -> Self {
        self.delegated_services.push(delegation.to_owned());
        self
    }

    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.path()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone()
    }

    pub fn socket_path_ref(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let socket = self
            .socket_path()
            .to_str()
            .expect("temporary socket path was not valid UTF-8")
            .to_owned();
        Ok(Config {
            machine_nickname: "scenario".to_owned(),
            local_socket: SocketEndpoint::unix(socket),
            interfaces: vec!["tcp=tcp://127.0.0.1:0".to_owned()],
            delegated_services: self.delegated_services.clone(),
            max_workers: 4,
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("stafd"),
            OsString::from("--local-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
