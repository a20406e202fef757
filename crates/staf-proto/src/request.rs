//! Completion modes for submitted requests.

use serde::{Deserialize, Serialize};

/// How a caller wants to learn the outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Block until the result is available.
    #[default]
    Sync,
    /// Return a request number immediately and discard the result.
    FireAndForget,
    /// Return a request number and queue a completion message to the caller.
    Queue,
    /// Return a request number and keep the result for later retrieval.
    Retain,
    /// Queue a completion message and keep the result.
    QueueRetain,
}

impl SyncMode {
    /// Decodes the wire value, rejecting unknown modes.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Sync),
            1 => Some(Self::FireAndForget),
            2 => Some(Self::Queue),
            3 => Some(Self::Retain),
            4 => Some(Self::QueueRetain),
            _ => None,
        }
    }

    /// Wire value of the mode.
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        match self {
            Self::Sync => 0,
            Self::FireAndForget => 1,
            Self::Queue => 2,
            Self::Retain => 3,
            Self::QueueRetain => 4,
        }
    }

    /// The caller blocks for the result.
    #[must_use]
    pub const fn is_sync(self) -> bool {
        matches!(self, Self::Sync)
    }

    /// A completion message must be queued to the caller.
    #[must_use]
    pub const fn queues_completion(self) -> bool {
        matches!(self, Self::Queue | Self::QueueRetain)
    }

    /// The result stays tracked until the caller frees it.
    #[must_use]
    pub const fn retains_result(self) -> bool {
        matches!(self, Self::Retain | Self::QueueRetain)
    }
}
