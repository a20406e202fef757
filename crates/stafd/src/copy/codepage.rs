//! Character set of files on this machine.
//!
//! Text travels between daemons as UTF-8; a codepage converts file bytes to
//! and from that form.

use encoding_rs::{Encoding, UTF_8};
use tracing::warn;

use super::COPY_TARGET;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Codepage {
    encoding: &'static Encoding,
}

impl Codepage {
    /// Looks up a codepage by WHATWG label, falling back to UTF-8.
    pub(crate) fn for_label(label: &str) -> Self {
        let encoding = Encoding::for_label(label.trim().as_bytes()).unwrap_or_else(|| {
            warn!(
                target: COPY_TARGET,
                codepage = label,
                "unknown codepage; using UTF-8"
            );
            UTF_8
        });
        Self { encoding }
    }

    pub(crate) fn name(self) -> &'static str {
        self.encoding.name()
    }

    /// Two labels name the same codepage when they resolve to one encoding.
    pub(crate) fn same_as(self, label: &str) -> bool {
        Encoding::for_label(label.trim().as_bytes()) == Some(self.encoding)
    }

    /// File bytes to text.
    pub(crate) fn decode(self, bytes: &[u8]) -> String {
        let (text, _, _) = self.encoding.decode(bytes);
        text.into_owned()
    }

    /// Text to file bytes.
    pub(crate) fn encode(self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.encoding.encode(text);
        bytes.into_owned()
    }
}
