//! Test harness utilities for the daemon behavioural suites.

mod client;
mod config_loader;
pub mod process_world;
mod reporter;
mod world;

pub use client::Client;
pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{TestWorld, world};
