//! `interface://host[:port]` endpoint strings.

use std::fmt;

/// Separator between an interface or authenticator and its entity.
pub(crate) const SPEC_SEPARATOR: &str = "://";

/// A parsed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) interface: Option<String>,
    pub(crate) host: String,
    pub(crate) port: Option<u16>,
}

impl Endpoint {
    pub(crate) fn parse(text: &str) -> Self {
        let text = text.trim();
        let (interface, rest) = split_specification(text);
        let (host, port) = split_port(rest);
        Self {
            interface: interface.map(str::to_ascii_lowercase),
            host: host.to_owned(),
            port,
        }
    }

    /// Copy of the endpoint routed through `interface`.
    pub(crate) fn with_interface(&self, interface: &str) -> Self {
        Self {
            interface: Some(interface.to_owned()),
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(interface) = &self.interface {
            write!(formatter, "{interface}{SPEC_SEPARATOR}")?;
        }
        formatter.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(formatter, ":{port}")?;
        }
        Ok(())
    }
}

/// Splits `group://entity`; text without a separator is all entity.
pub(crate) fn split_specification(text: &str) -> (Option<&str>, &str) {
    match text.split_once(SPEC_SEPARATOR) {
        Some((group, entity)) => (Some(group), entity),
        None => (None, text),
    }
}

/// Splits a trailing numeric `:port` off a host.
pub(crate) fn split_port(host: &str) -> (&str, Option<u16>) {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => match port.parse() {
            Ok(port) => (name, Some(port)),
            Err(_) => (host, None),
        },
        _ => (host, None),
    }
}

/// Host part of `host[:port]`.
pub(crate) fn strip_port(host: &str) -> &str {
    split_port(host).0
}
