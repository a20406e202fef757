//! The API dispatch table and the conversations it admits.
//!
//! Every inbound connection opens with an API number and a level. The
//! [`DispatchConnectionHandler`] negotiates both against a fixed table whose
//! rows say which interfaces may use an API and which levels it speaks, then
//! runs the row's handler on the stream:
//!
//! | API | Purpose                                | Interfaces |
//! |-----|----------------------------------------|------------|
//! | 0   | service request from a local process   | local      |
//! | 1   | forwarded request, original framing    | network    |
//! | 2,3 | handle registration and release        | local      |
//! | 4,5 | file copy                              | both       |
//! | 6   | directory copy                         | both       |
//! | 7   | forwarded request with identity        | network    |
//! | 8-10| handle termination notifications       | network    |
//!
//! Outbound conversations use [`open_api`] and [`open_legacy_api`].

mod handler;
mod negotiate;
mod registration;
mod service_request;
mod table;
mod termination;
mod transfer;

pub(crate) use self::handler::DispatchConnectionHandler;
pub(crate) use self::negotiate::{Opened, open_api, open_legacy_api};

/// Tracing target for dispatch.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
