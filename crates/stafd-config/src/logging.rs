//! Log output: the line format and the request trace points.
//!
//! Trace points are the categories of per-request events an operator can
//! switch on or off without touching the filter expression. Each one maps to
//! its own `tracing` target inside the daemon.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Categories of request events that can be traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TracePoint {
    /// A request arriving for a local service.
    ServiceRequests,
    /// A request completing with return code 0.
    ServiceResults,
    /// A request completing with any other return code.
    ServiceErrors,
    /// A request refused for insufficient trust.
    AccessDenied,
    /// A request forwarded to another machine.
    RemoteRequests,
}

impl TracePoint {
    /// Every trace point, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::ServiceRequests,
        Self::ServiceResults,
        Self::ServiceErrors,
        Self::AccessDenied,
        Self::RemoteRequests,
    ];
}

/// Errors encountered while parsing a [`TracePoint`] from text.
pub type TracePointParseError = strum::ParseError;
