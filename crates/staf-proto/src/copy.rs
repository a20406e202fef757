//! In-band markers of the file and directory copy sub-protocols.
//!
//! A directory stream is a sequence of entries, each introduced by
//! [`CONTINUE_COPY`] and an [`EntryKind`] tag, and closed by [`STOP_COPY`].
//! Text transfers end their chunk sequence with [`FINISHED_COPY`].

/// Another entry or chunk follows.
pub const CONTINUE_COPY: u32 = 0;

/// No further entries follow; also sent by a receiver to abort a text
/// negotiation.
pub const STOP_COPY: u32 = 1;

/// End of a chunked text transfer.
pub const FINISHED_COPY: u32 = u32::MAX;

/// Chunk size for binary transfers.
pub const BINARY_CHUNK: u32 = 4000;

/// Chunk size for text transfers without codepage conversion.
pub const TEXT_CHUNK: u32 = 3000;

/// Initial line buffer for text transfers with codepage conversion.
pub const CONVERT_BUFFER: usize = 4096;

/// Prefix scanned when detecting a file's line ending.
pub const EOL_SCAN_BYTES: usize = 4000;

/// Entry tag in a directory stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

impl EntryKind {
    /// Wire value of the tag.
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        match self {
            Self::File => 1,
            Self::Directory => 2,
        }
    }

    /// Decodes a wire tag.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::File),
            2 => Some(Self::Directory),
            _ => None,
        }
    }
}

/// How a single file's bytes travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferMode {
    /// Bytes are copied unchanged.
    #[default]
    Binary,
    /// Line endings are rewritten by the receiver.
    TextNoConvert,
    /// Lines are decoded by the sender and re-encoded by the receiver.
    TextConvert,
}

impl TransferMode {
    /// Wire value of the mode.
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        match self {
            Self::Binary => 0,
            Self::TextNoConvert => 1,
            Self::TextConvert => 2,
        }
    }

    /// Decodes a wire mode; unknown values fall back to binary.
    #[must_use]
    pub const fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::TextNoConvert,
            2 => Self::TextConvert,
            _ => Self::Binary,
        }
    }

    /// Human-readable name used in listings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "Binary",
            Self::TextNoConvert => "Text",
            Self::TextConvert => "Text (codepage convert)",
        }
    }
}

/// Existence preconditions on the copy target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyFlags(u32);

impl CopyFlags {
    /// Fail when the target already exists.
    pub const FAIL_IF_EXISTS: Self = Self(0x1);
    /// Fail when the target does not exist.
    pub const FAIL_IF_NEW: Self = Self(0x2);

    /// No preconditions.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds flags from their wire value.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Wire value of the flags.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}
