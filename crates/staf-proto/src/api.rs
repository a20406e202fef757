//! API numbers sent as the first word of every connection.

use std::fmt;

/// The conversation a peer wants to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    /// Local process submits a service request.
    LocalServiceRequest,
    /// Remote daemon submits a request using the original framing.
    RemoteServiceRequest,
    /// Local process registers a handle.
    ProcessRegistration,
    /// Local process releases a handle.
    ProcessUnregistration,
    /// Binary file transfer using the original framing.
    FileTransfer,
    /// File transfer with text and codepage modes.
    FileTransferV2,
    /// Whole directory transfer.
    DirectoryCopy,
    /// Remote daemon submits a request carrying identity and variable pools.
    RemoteServiceRequestV2,
    /// Remote daemon asks to be told when a handle terminates.
    HandleTerminationRegistration,
    /// Remote daemon reports that one of its handles terminated.
    RemoteHandleTerminated,
    /// Remote daemon withdraws a termination registration.
    HandleTerminationUnregistration,
}

impl Api {
    /// Every API in wire-number order.
    pub const ALL: [Self; 11] = [
        Self::LocalServiceRequest,
        Self::RemoteServiceRequest,
        Self::ProcessRegistration,
        Self::ProcessUnregistration,
        Self::FileTransfer,
        Self::FileTransferV2,
        Self::DirectoryCopy,
        Self::RemoteServiceRequestV2,
        Self::HandleTerminationRegistration,
        Self::RemoteHandleTerminated,
        Self::HandleTerminationUnregistration,
    ];

    /// Number written on the wire.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::LocalServiceRequest => 0,
            Self::RemoteServiceRequest => 1,
            Self::ProcessRegistration => 2,
            Self::ProcessUnregistration => 3,
            Self::FileTransfer => 4,
            Self::FileTransferV2 => 5,
            Self::DirectoryCopy => 6,
            Self::RemoteServiceRequestV2 => 7,
            Self::HandleTerminationRegistration => 8,
            Self::RemoteHandleTerminated => 9,
            Self::HandleTerminationUnregistration => 10,
        }
    }

    /// Looks up an API by wire number, returning `None` beyond the table.
    #[must_use]
    pub fn from_number(number: u32) -> Option<Self> {
        usize::try_from(number)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }
}

impl fmt::Display for Api {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.number())
    }
}
