//! Wall-clock timestamps shown in listings.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC time in RFC 3339 form.
pub(crate) fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
