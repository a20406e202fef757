//! Services answered by another daemon.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A delegation such as `LOG=logs.example.com` or `AUDIT=tcp://hub:6500/LOG`.
///
/// Requests for `name` are forwarded to `machine`, where they are served by
/// `service`, which defaults to `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateSpec {
    name: String,
    machine: String,
    service: String,
}

impl DelegateSpec {
    /// Local service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Machine that serves the requests.
    #[must_use]
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// Service name on the serving machine.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for DelegateSpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}/{}", self.name, self.machine, self.service)
    }
}

impl FromStr for DelegateSpec {
    type Err = DelegateSpecParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, target) = input
            .split_once('=')
            .ok_or_else(|| DelegateSpecParseError::MissingMachine(input.to_owned()))?;
        let name = name.trim().to_ascii_uppercase();
        if name.is_empty() {
            return Err(DelegateSpecParseError::MissingName(input.to_owned()));
        }
        let target = target.trim();
        let (machine, service) = match target.rsplit_once('/') {
            Some((machine, service)) if !machine.ends_with('/') => {
                (machine.trim(), service.trim().to_ascii_uppercase())
            }
            _ => (target, name.clone()),
        };
        if machine.is_empty() || service.is_empty() {
            return Err(DelegateSpecParseError::MissingMachine(input.to_owned()));
        }
        Ok(Self {
            name,
            machine: machine.to_owned(),
            service,
        })
    }
}

/// Errors raised while parsing a [`DelegateSpec`].
#[derive(Debug, Error)]
pub enum DelegateSpecParseError {
    /// Empty service name.
    #[error("delegated service '{0}' names no service")]
    MissingName(String),
    /// No `=machine` part.
    #[error("delegated service '{0}' must be written as NAME=machine[/SERVICE]")]
    MissingMachine(String),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("log=logs.example.com", "LOG", "logs.example.com", "LOG")]
    #[case("AUDIT = tcp://hub:6500/log", "AUDIT", "tcp://hub:6500", "LOG")]
    #[case("PING=tcp://hub", "PING", "tcp://hub", "PING")]
    fn parses_delegations(
        #[case] input: &str,
        #[case] name: &str,
        #[case] machine: &str,
        #[case] service: &str,
    ) {
        let spec: DelegateSpec = input.parse().expect("valid delegation");
        assert_eq!(spec.name(), name);
        assert_eq!(spec.machine(), machine);
        assert_eq!(spec.service(), service);
    }

    #[rstest]
    #[case("LOG")]
    #[case("=hub")]
    #[case("LOG=")]
    #[case("LOG=hub/")]
    fn rejects_invalid_delegations(#[case] input: &str) {
        assert!(input.parse::<DelegateSpec>().is_err());
    }
}
