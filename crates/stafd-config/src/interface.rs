//! Textual description of a network interface.
//!
//! An interface is written `name=tcp://host:port`, optionally suffixed with
//! `;secure` when the transport authenticates its peers. The name `local` is
//! reserved for the daemon's own socket and cannot be configured here.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::socket::{SocketEndpoint, SocketParseError};

const SECURE_SUFFIX: &str = ";secure";

/// Interface name reserved for the local socket.
pub const LOCAL_INTERFACE: &str = "local";

/// A configured network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    name: String,
    endpoint: SocketEndpoint,
    secure: bool,
}

impl InterfaceSpec {
    /// Builds an interface description.
    #[must_use]
    pub fn new(name: impl Into<String>, endpoint: SocketEndpoint, secure: bool) -> Self {
        Self {
            name: name.into(),
            endpoint,
            secure,
        }
    }

    /// Interface name, lowercased.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the interface listens on.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Whether the transport authenticates its peers.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for InterfaceSpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}", self.name, self.endpoint)?;
        if self.secure {
            formatter.write_str(SECURE_SUFFIX)?;
        }
        Ok(())
    }
}

impl FromStr for InterfaceSpec {
    type Err = InterfaceParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, rest) = input
            .split_once('=')
            .ok_or_else(|| InterfaceParseError::MissingName(input.to_owned()))?;
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(InterfaceParseError::MissingName(input.to_owned()));
        }
        if name == LOCAL_INTERFACE {
            return Err(InterfaceParseError::Reserved(name));
        }
        let rest = rest.trim();
        let (address, secure) = match rest.strip_suffix(SECURE_SUFFIX) {
            Some(address) => (address, true),
            None => (rest, false),
        };
        let endpoint = address
            .parse()
            .map_err(|source| InterfaceParseError::Endpoint {
                name: name.clone(),
                source,
            })?;
        Ok(Self::new(name, endpoint, secure))
    }
}

/// Errors raised while parsing an [`InterfaceSpec`].
#[derive(Debug, Error)]
pub enum InterfaceParseError {
    /// The `name=` prefix was missing or empty.
    #[error("interface '{0}' must be written as name=tcp://host:port")]
    MissingName(String),
    /// The reserved local interface name was used.
    #[error("interface name '{0}' is reserved")]
    Reserved(String),
    /// The address part was not a valid endpoint.
    #[error("interface '{name}' has an invalid address: {source}")]
    Endpoint {
        name: String,
        #[source]
        source: SocketParseError,
    },
}
