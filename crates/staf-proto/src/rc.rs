//! Numeric return codes exchanged on every reply.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a request, transmitted as a `u32`.
///
/// Only the codes the routing core produces or inspects are named; anything
/// else received from a peer or a service is preserved as [`Self::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ReturnCode {
    /// Success.
    Ok,
    /// Unknown API number, or API not available on this transport.
    InvalidApi,
    /// No service is registered under the requested name.
    UnknownService,
    /// The handle is not registered.
    InvalidHandle,
    /// The handle is already registered.
    HandleAlreadyExists,
    /// The handle does not exist.
    HandleDoesNotExist,
    /// Unclassified failure.
    UnknownError,
    /// The request string could not be parsed.
    InvalidRequestString,
    /// An operating system call failed.
    BaseOsError,
    /// No provider could reach the destination.
    NoPathToMachine,
    /// A file could not be opened.
    FileOpenError,
    /// A file could not be read.
    FileReadError,
    /// A file could not be written.
    FileWriteError,
    /// An established connection failed mid-conversation.
    CommunicationError,
    /// The named trustee does not exist.
    TrusteeDoesNotExist,
    /// A trust level is outside the permitted range.
    InvalidTrustLevel,
    /// The requester's trust level is too low.
    AccessDenied,
    /// The handle's queue holds no matching message.
    NoQueueElement,
    /// No mutually supported API level exists.
    InvalidApiLevel,
    /// The request number is not tracked.
    RequestNumberNotFound,
    /// The request has not completed yet.
    RequestNotComplete,
    /// An option value is invalid.
    InvalidValue,
    /// The named item does not exist.
    DoesNotExist,
    /// The named item already exists.
    AlreadyExists,
    /// One or more entries of a directory copy failed.
    DirectoryCopyError,
    /// A size limit was exceeded.
    MaximumSizeExceeded,
    /// Any other code.
    Other(u32),
}

impl ReturnCode {
    /// Numeric value sent on the wire.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::InvalidApi => 1,
            Self::UnknownService => 2,
            Self::InvalidHandle => 3,
            Self::HandleAlreadyExists => 4,
            Self::HandleDoesNotExist => 5,
            Self::UnknownError => 6,
            Self::InvalidRequestString => 7,
            Self::BaseOsError => 10,
            Self::NoPathToMachine => 16,
            Self::FileOpenError => 17,
            Self::FileReadError => 18,
            Self::FileWriteError => 19,
            Self::CommunicationError => 22,
            Self::TrusteeDoesNotExist => 23,
            Self::InvalidTrustLevel => 24,
            Self::AccessDenied => 25,
            Self::NoQueueElement => 29,
            Self::InvalidApiLevel => 31,
            Self::RequestNumberNotFound => 42,
            Self::RequestNotComplete => 44,
            Self::InvalidValue => 46,
            Self::DoesNotExist => 47,
            Self::AlreadyExists => 48,
            Self::DirectoryCopyError => 50,
            Self::MaximumSizeExceeded => 57,
            Self::Other(code) => code,
        }
    }

    /// Maps a wire value back to a return code.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::InvalidApi,
            2 => Self::UnknownService,
            3 => Self::InvalidHandle,
            4 => Self::HandleAlreadyExists,
            5 => Self::HandleDoesNotExist,
            6 => Self::UnknownError,
            7 => Self::InvalidRequestString,
            10 => Self::BaseOsError,
            16 => Self::NoPathToMachine,
            17 => Self::FileOpenError,
            18 => Self::FileReadError,
            19 => Self::FileWriteError,
            22 => Self::CommunicationError,
            23 => Self::TrusteeDoesNotExist,
            24 => Self::InvalidTrustLevel,
            25 => Self::AccessDenied,
            29 => Self::NoQueueElement,
            31 => Self::InvalidApiLevel,
            42 => Self::RequestNumberNotFound,
            44 => Self::RequestNotComplete,
            46 => Self::InvalidValue,
            47 => Self::DoesNotExist,
            48 => Self::AlreadyExists,
            50 => Self::DirectoryCopyError,
            57 => Self::MaximumSizeExceeded,
            other => Self::Other(other),
        }
    }

    /// Returns `true` for [`Self::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<u32> for ReturnCode {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<ReturnCode> for u32 {
    fn from(rc: ReturnCode) -> Self {
        rc.code()
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, ReturnCode::Ok)]
    #[case(16, ReturnCode::NoPathToMachine)]
    #[case(25, ReturnCode::AccessDenied)]
    #[case(50, ReturnCode::DirectoryCopyError)]
    #[case(4001, ReturnCode::Other(4001))]
    fn codes_map_both_ways(#[case] code: u32, #[case] rc: ReturnCode) {
        assert_eq!(ReturnCode::from(code), rc);
        assert_eq!(u32::from(rc), code);
    }

    #[rstest]
    fn display_prints_the_number() {
        assert_eq!(ReturnCode::InvalidApiLevel.to_string(), "31");
    }
}
