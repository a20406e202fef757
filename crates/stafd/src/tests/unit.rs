//! Unit tests for the daemon bootstrap utilities.

use std::sync::Arc;

use rstest::rstest;

use crate::bootstrap_with;

use super::support::{Client, HealthEvent, RecordingHealthReporter, TestConfigLoader};

#[rstest]
fn bootstrap_does_not_bind_interfaces() {
    let loader = TestConfigLoader::new();
    let reporter = Arc::new(RecordingHealthReporter::default());

    let daemon = bootstrap_with(&loader, reporter.clone()).expect("bootstrap should succeed");

    let events = reporter.events();
    assert!(events.contains(&HealthEvent::BootstrapSucceeded));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, HealthEvent::InterfaceListening(_))),
        "nothing should listen before serve: {events:?}"
    );
    assert!(!loader.socket_path().exists());
    assert!(!daemon.shutdown_requested());
}

#[rstest]
fn serve_binds_every_interface_and_stop_releases_them() {
    let loader = TestConfigLoader::new();
    let reporter = Arc::new(RecordingHealthReporter::default());
    let daemon = bootstrap_with(&loader, reporter.clone()).expect("bootstrap should succeed");

    let interfaces = daemon.serve().expect("interfaces bind");
    let events = reporter.events();
    assert!(events.contains(&HealthEvent::InterfaceListening("local".to_owned())));
    assert!(events.contains(&HealthEvent::InterfaceListening("tcp".to_owned())));

    let socket = loader.socket_path();
    let client = Client::Local(&socket);
    let (rc, handle) = client.register(std::process::id(), "unit");
    assert!(rc.is_ok());
    let (rc, result) = client.submit(std::process::id(), handle, "local", "PING", "PING");
    assert!(rc.is_ok(), "{result}");
    assert_eq!(result, "PONG");

    interfaces.stop().expect("interfaces stop");
}

#[rstest]
fn shutdown_requests_flip_the_daemon_latch() {
    let loader = TestConfigLoader::new();
    let reporter = Arc::new(RecordingHealthReporter::default());
    let daemon = bootstrap_with(&loader, reporter).expect("bootstrap should succeed");
    let interfaces = daemon.serve().expect("interfaces bind");

    let socket = loader.socket_path();
    let client = Client::Local(&socket);
    let (_, handle) = client.register(std::process::id(), "operator");
    let (rc, _) = client.submit(std::process::id(), handle, "local", "SHUTDOWN", "SHUTDOWN");
    assert!(rc.is_ok());
    assert!(
        daemon
            .router()
            .shutdown_latch()
            .wait_for(std::time::Duration::from_secs(2)),
        "shutdown latch should trigger after the reply"
    );
    assert!(daemon.shutdown_requested());

    interfaces.stop().expect("interfaces stop");
}
