//! Daemon lifecycle specs
//!
//! Verify the daemon binary's startup, files and failure reporting.

use crate::prelude::*;
use similar_asserts::assert_eq;

#[test]
fn daemon_prints_ready_and_creates_files() {
    let temp = Project::empty();
    let daemon = temp.start();

    assert!(daemon.socket().exists(), "socket should exist");
    let pid = std::fs::read_to_string(&daemon.config.lock_path).unwrap();
    assert_eq!(pid.trim().to_string(), daemon.pid().to_string());
    assert!(daemon.config.version_path.exists(), "daemon.version should exist");
}

#[test]
fn daemon_log_has_startup_marker() {
    let temp = Project::empty();
    let daemon = temp.start();

    let found = wait_for(SPEC_WAIT_MAX_MS, || {
        let log = daemon.log();
        log.contains("rwgated: starting (pid: ") && log.contains("Daemon ready")
    });
    assert!(found, "log was:\n{}", daemon.log());
}

#[test]
fn second_daemon_for_same_project_fails() {
    let temp = Project::empty();
    let _daemon = temp.start();

    let status = temp.rwgated().output().unwrap().status;
    assert!(!status.success());
}

#[test]
fn invalid_config_is_reported_in_log() {
    let temp = Project::empty();
    temp.file("rwgate.toml", "max_name_attempts = 0\n");

    let output = temp.rwgated().output().unwrap();
    assert!(!output.status.success());

    let config = temp.daemon_config();
    let log = std::fs::read_to_string(&config.log_path).unwrap();
    assert!(
        log.contains("ERROR Failed to start daemon"),
        "log was:\n{}",
        log
    );
    assert!(!config.socket_path.exists());
}

#[tokio::test]
async fn daemon_reports_its_config_through_state() {
    let temp = Project::empty();
    temp.file("rwgate.toml", "max_threads = 2\n");
    let daemon = temp.start();

    let client = daemon.client("w1").await;
    let snapshot = client.state().await.unwrap();

    assert_eq!(snapshot.threads.capacity, 2);
    assert_eq!(snapshot.pending, 0);
}
