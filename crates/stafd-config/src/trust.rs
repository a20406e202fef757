//! Textual trust rules loaded at startup.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Highest trust level a rule may grant.
pub const MAX_TRUST_LEVEL: u32 = 5;

/// A trust rule such as `tcp://*.example.com=4` or `none://anonymous=1`.
///
/// The trustee part is kept verbatim; matching semantics belong to the
/// daemon's trust engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustSpec {
    trustee: String,
    level: u32,
}

impl TrustSpec {
    /// Builds a rule, rejecting levels above [`MAX_TRUST_LEVEL`].
    pub fn new(trustee: impl Into<String>, level: u32) -> Result<Self, TrustSpecParseError> {
        let trustee = trustee.into();
        if level > MAX_TRUST_LEVEL {
            return Err(TrustSpecParseError::LevelOutOfRange { trustee, level });
        }
        Ok(Self { trustee, level })
    }

    /// Trustee pattern, e.g. `tcp://host` or `authenticator://user`.
    #[must_use]
    pub fn trustee(&self) -> &str {
        &self.trustee
    }

    /// Granted level.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl fmt::Display for TrustSpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}", self.trustee, self.level)
    }
}

impl FromStr for TrustSpec {
    type Err = TrustSpecParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (trustee, level) = input
            .rsplit_once('=')
            .ok_or_else(|| TrustSpecParseError::MissingLevel(input.to_owned()))?;
        let trustee = trustee.trim();
        if trustee.is_empty() {
            return Err(TrustSpecParseError::MissingTrustee(input.to_owned()));
        }
        let level = level
            .trim()
            .parse()
            .map_err(|_| TrustSpecParseError::InvalidLevel(input.to_owned()))?;
        Self::new(trustee, level)
    }
}

/// Errors raised while parsing a [`TrustSpec`].
#[derive(Debug, Error)]
pub enum TrustSpecParseError {
    /// No `=level` suffix.
    #[error("trust rule '{0}' must end with =level")]
    MissingLevel(String),
    /// Empty trustee.
    #[error("trust rule '{0}' names no trustee")]
    MissingTrustee(String),
    /// The level was not a number.
    #[error("trust rule '{0}' has a non-numeric level")]
    InvalidLevel(String),
    /// The level exceeded the maximum.
    #[error("trust level {level} for '{trustee}' exceeds {MAX_TRUST_LEVEL}")]
    LevelOutOfRange { trustee: String, level: u32 },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("tcp://*.example.com=4", "tcp://*.example.com", 4)]
    #[case("local://local = 5", "local://local", 5)]
    #[case("none://anonymous=0", "none://anonymous", 0)]
    fn parses_rules(#[case] input: &str, #[case] trustee: &str, #[case] level: u32) {
        let spec: TrustSpec = input.parse().expect("valid rule");
        assert_eq!(spec.trustee(), trustee);
        assert_eq!(spec.level(), level);
    }

    #[rstest]
    #[case("tcp://host")]
    #[case("=3")]
    #[case("tcp://host=high")]
    #[case("tcp://host=6")]
    fn rejects_invalid_rules(#[case] input: &str) {
        assert!(input.parse::<TrustSpec>().is_err());
    }
}
