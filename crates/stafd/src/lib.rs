//! Peer-to-peer automation daemon.
//!
//! `stafd` runs on every participating machine. Local processes register
//! handles over the reserved `local` interface and submit requests to named
//! services; requests for other machines are forwarded to the daemon there
//! over a network interface. Every inbound request is assigned a trust level
//! from the machine and user trust tables before a service sees it.
//!
//! The crate is organised around a shared router:
//!
//! - `transport` providers listen on sockets and feed accepted
//!   connections to a bounded worker pool;
//! - `dispatch` negotiates an API number and level on each connection and
//!   runs the matching handler;
//! - `submit` routes service requests locally or to a peer, honouring the
//!   requested sync mode;
//! - `services` holds the built-in services, delegated services and the
//!   authenticator registry;
//! - `copy` implements the file and directory transfer protocols on both
//!   sides, tracked by the copy registry.
//!
//! Startup is split in two: [`bootstrap_with`] assembles a [`Daemon`] from
//! configuration, and [`run_daemon`] adds the process concerns (lock and pid
//! files, daemonisation, health snapshots and signal-driven shutdown).

mod bootstrap;
mod clock;
mod connections;
mod copy;
mod dispatch;
mod endpoint;
mod handles;
mod health;
mod identity;
mod process;
mod requests;
mod router;
mod services;
mod settings;
mod submit;
mod telemetry;
mod transport;
mod trust;
mod variables;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, LaunchMode, RuntimeFile, run_daemon};
pub use router::RouterError;
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
