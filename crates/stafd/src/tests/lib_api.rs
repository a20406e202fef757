//! Tests that exercise the crate's public re-exports.

use std::sync::Arc;

use rstest::rstest;

use crate::{BootstrapError, ConfigLoader, StaticConfigLoader, bootstrap_with};

use super::support::{FailingConfigLoader, HealthEvent, RecordingHealthReporter, TestConfigLoader};

#[rstest]
fn bootstrap_with_reexport_initialises_daemon() {
    let loader = TestConfigLoader::new();
    let reporter = Arc::new(RecordingHealthReporter::default());

    let daemon = bootstrap_with(&loader, reporter.clone()).expect("bootstrap should succeed");

    assert!(daemon.config().local_socket().prepare_filesystem().is_ok());
    assert_eq!(daemon.config().machine_nickname, "scenario");
    let events = reporter.events();
    assert!(events.contains(&HealthEvent::BootstrapStarting));
    assert!(events.contains(&HealthEvent::BootstrapSucceeded));
}

#[rstest]
fn static_loader_hands_back_its_configuration() {
    let config = TestConfigLoader::new().load().expect("config");
    let loader = StaticConfigLoader::new(config.clone());
    let reporter = Arc::new(RecordingHealthReporter::default());

    let daemon = bootstrap_with(&loader, reporter).expect("bootstrap should succeed");
    assert_eq!(daemon.config().local_socket(), config.local_socket());
}

#[rstest]
fn configuration_failures_surface_as_bootstrap_errors() {
    let reporter = Arc::new(RecordingHealthReporter::default());
    let Err(error) = bootstrap_with(&FailingConfigLoader, reporter) else {
        panic!("bootstrap should fail");
    };
    assert!(matches!(error, BootstrapError::Configuration { .. }));
}
