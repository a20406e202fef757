//! Connection providers and the sockets behind them.
//!
//! Each provider binds one listening socket and accepts connections in a
//! background thread, handing every accepted connection to a bounded
//! [`WorkerPool`]. Providers also originate outbound connections for the
//! connection manager.

mod connection;
mod errors;
mod handler;
mod listener;
mod pool;
mod provider;
#[cfg(test)]
mod test_utils;

pub(crate) use self::connection::{Connection, Peer, WireStream};
pub use self::errors::ListenerError;
pub(crate) use self::errors::{ConnectError, PoolError};
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
pub(crate) use self::pool::WorkerPool;
pub(crate) use self::provider::{ConnectionProvider, SocketProvider};
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
