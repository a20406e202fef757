//! File and directory copies between daemons.
//!
//! The sending side runs inside the FS service and pushes data over an
//! outbound connection; the receiving side is entered from the API dispatch
//! table. Both register in the [`CopyRegistry`] for as long as bytes move so
//! that conflicting transfers on one path are refused.

mod authorize;
mod codepage;
mod disk;
mod eol;
mod outbound;
mod receive_dir;
mod receive_file;
mod registry;
mod send_dir;
mod send_file;
#[cfg(test)]
pub(crate) mod test_support;
mod transfer;

#[cfg(test)]
pub(crate) use self::registry::CopyTicket;
pub(crate) use self::registry::{CopyRegistry, CopySummary, Direction};
pub(crate) use self::receive_dir::receive_directory;
pub(crate) use self::receive_file::{FileApi, receive_file};
pub(crate) use self::send_dir::{DirectoryCopy, send_directory};
pub(crate) use self::send_file::{FileCopy, send_file};

/// Tracing target for copy traffic.
pub(crate) const COPY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::copy");
