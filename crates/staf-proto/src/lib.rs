//! Wire-level vocabulary shared by the automation daemon and its peers.
//!
//! Every connection between two daemons, or between a client process and its
//! local daemon, speaks the same framing: fixed-width unsigned integers in
//! network byte order and byte-length-prefixed UTF-8 strings. This crate owns
//! that framing ([`ReadWire`] and [`WriteWire`]), the numeric return-code
//! taxonomy ([`ReturnCode`]), the API numbers that open every conversation
//! ([`Api`]), the request completion modes ([`SyncMode`]) and the in-band
//! markers used by the file and directory copy sub-protocols ([`copy`]).
//!
//! The crate performs no I/O of its own beyond the `Read`/`Write` streams it
//! is handed; timeouts and retries belong to the caller.

mod api;
mod codec;
pub mod copy;
mod rc;
mod request;

pub use api::Api;
pub use codec::{
    DEFAULT_PAYLOAD_LIMIT, ReadWire, WireError, WriteWire, payload_limit, set_payload_limit,
};
pub use rc::ReturnCode;
pub use request::SyncMode;
