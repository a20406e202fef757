//! Behaviour tests for layered configuration loading.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;


use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use stafd_config::{
    Config, DEFAULT_TRUST_LEVEL, SocketEndpoint, default_log_filter, default_log_format,
    default_socket_endpoint,
};

struct Harness {
    temp_dir: TempDir,
    file_lines: RefCell<Vec<String>>,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temporary directory");
        Self {
            temp_dir,
            file_lines: RefCell::new(Vec::new()),
            cli_args: RefCell::new(vec![OsString::from("stafd")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn add_file_line(&self, line: String) {
        self.file_lines.borrow_mut().push(line);
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Restored in `Drop`.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_string(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }

        let mut args = self.cli_args.borrow().clone();
        let lines = self.file_lines.borrow();
        if !lines.is_empty() {
            let path = self.temp_dir.path().join("stafd.toml");
            fs::write(&path, lines.join("\n")).expect("failed to write configuration");
            args.insert(1, path.into_os_string());
            args.insert(1, OsString::from("--config-path"));
        }

        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn config(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        self.loaded
            .borrow()
            .clone()
            .expect("configuration was not loaded")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(os_value) => unsafe { std::env::set_var(&key, os_value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

fn socket_line(socket: &SocketEndpoint) -> String {
    match socket {
        SocketEndpoint::Unix { path } => {
            format!("local_socket = {{ transport = \"unix\", path = \"{path}\" }}")
        }
        SocketEndpoint::Tcp { host, port } => format!(
            "local_socket = {{ transport = \"tcp\", host = \"{host}\", port = {port} }}"
        ),
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the local socket to \"{socket}\"")]
fn given_configuration_socket(harness: &Harness, socket: String) {
    let endpoint = socket
        .parse::<SocketEndpoint>()
        .unwrap_or_else(|error| panic!("invalid socket '{socket}': {error}"));
    harness.add_file_line(socket_line(&endpoint));
}

#[given("a configuration file setting the default trust to {level}")]
fn given_configuration_trust(harness: &Harness, level: u32) {
    harness.add_file_line(format!("default_trust = {level}"));
}

#[given("the environment overrides the local socket to \"{socket}\"")]
fn given_environment_socket(harness: &Harness, socket: String) {
    harness.set_env("STAFD_LOCAL_SOCKET", &socket);
}

#[given("the environment overrides the default trust to {level}")]
fn given_environment_trust(harness: &Harness, level: u32) {
    harness.set_env("STAFD_DEFAULT_TRUST", &level.to_string());
}

#[when("the command line sets the local socket to \"{socket}\"")]
fn when_cli_socket(harness: &Harness, socket: String) {
    harness.push_cli_arg("--local-socket");
    harness.push_cli_arg(OsString::from(&socket));
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the local socket to \"{socket}\"")]
fn then_resolved_socket(harness: &Harness, socket: String) {
    let expected = socket
        .parse::<SocketEndpoint>()
        .unwrap_or_else(|error| panic!("invalid expected socket '{socket}': {error}"));
    assert_eq!(harness.config().local_socket(), &expected);
}

#[then("the default trust resolves to {level}")]
fn then_resolved_trust(harness: &Harness, level: u32) {
    assert_eq!(harness.config().default_trust, level);
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.config();
    assert_eq!(config.local_socket(), &default_socket_endpoint());
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.default_trust, DEFAULT_TRUST_LEVEL);
    assert!(config.interface_cycling);
    let interfaces = config.interface_specs().expect("default interfaces parse");
    assert_eq!(interfaces.len(), 1);
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}
