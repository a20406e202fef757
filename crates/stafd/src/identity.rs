//! Who this daemon instance is on the network.

use uuid::Uuid;

use stafd_config::Config;

/// Name every daemon answers to for requests addressed to itself.
pub(crate) const LOCAL_MACHINE: &str = "local";

/// Long form of [`LOCAL_MACHINE`].
pub(crate) const LOCAL_MACHINE_LONG: &str = "local://local";

/// Names and the per-process instance UUID of this daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    machine: String,
    nickname: String,
    instance_uuid: String,
}

impl Identity {
    pub(crate) fn new(machine: impl Into<String>, nickname: impl Into<String>) -> Self {
        let machine = machine.into();
        let nickname = nickname.into();
        let nickname = if nickname.is_empty() {
            machine.clone()
        } else {
            nickname
        };
        Self {
            machine,
            nickname,
            instance_uuid: Uuid::new_v4().to_string(),
        }
    }

    /// Resolves the host name and applies the configured nickname.
    pub(crate) fn from_config(config: &Config) -> Self {
        Self::new(host_name(), config.machine_nickname.clone())
    }

    pub(crate) fn machine(&self) -> &str {
        &self.machine
    }

    pub(crate) fn nickname(&self) -> &str {
        &self.nickname
    }

    pub(crate) fn instance_uuid(&self) -> &str {
        &self.instance_uuid
    }

    /// Returns `true` when `uuid` names this very process.
    pub(crate) fn is_self(&self, uuid: &str) -> bool {
        self.instance_uuid == uuid
    }
}

/// Returns `true` when a target machine addresses this daemon.
pub(crate) fn is_local_target(machine: &str) -> bool {
    machine.eq_ignore_ascii_case(LOCAL_MACHINE) || machine.eq_ignore_ascii_case(LOCAL_MACHINE_LONG)
}

fn host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}
