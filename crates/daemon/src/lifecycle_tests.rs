// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;

struct Dirs {
    project: TempDir,
    state: TempDir,
    sockets: TempDir,
}

fn dirs() -> Dirs {
    Dirs {
        project: tempfile::tempdir().unwrap(),
        state: tempfile::tempdir().unwrap(),
        sockets: tempfile::tempdir().unwrap(),
    }
}

impl Dirs {
    fn config(&self) -> Config {
        Config::in_dirs(self.project.path(), self.state.path(), self.sockets.path()).unwrap()
    }
}

#[test]
fn paths_are_keyed_by_project_hash() {
    let d = dirs();
    let config = d.config();

    let hash = project_hash(&d.project.path().canonicalize().unwrap());
    assert_eq!(hash.len(), 16);
    assert_eq!(
        config.socket_path,
        d.sockets.path().join(format!("{}.sock", hash))
    );
    assert_eq!(
        config.lock_path,
        d.state.path().join("projects").join(&hash).join("daemon.pid")
    );
    assert_eq!(config.log_path.file_name().unwrap(), "daemon.log");
}

#[test]
fn missing_project_is_an_error() {
    let d = dirs();
    let result = Config::in_dirs(
        &d.project.path().join("nope"),
        d.state.path(),
        d.sockets.path(),
    );
    assert!(matches!(result, Err(LifecycleError::ProjectNotFound(..))));
}

#[tokio::test]
async fn startup_creates_files_and_shutdown_removes_them() {
    let d = dirs();
    let config = d.config();

    let daemon = startup(&config).await.unwrap();
    assert!(config.socket_path.exists());
    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());
    assert_eq!(
        std::fs::read_to_string(&config.version_path).unwrap(),
        env!("CARGO_PKG_VERSION")
    );

    daemon.shutdown().await.unwrap();
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
    assert!(!config.version_path.exists());
}

#[tokio::test]
async fn second_daemon_for_project_fails_to_lock() {
    let d = dirs();
    let config = d.config();

    let first = startup(&config).await.unwrap();
    let second = startup(&config).await;

    assert!(matches!(second, Err(LifecycleError::LockFailed(_))));
    assert!(config.lock_path.exists());
    first.shutdown().await.unwrap();
}

#[tokio::test]
async fn project_config_is_loaded() {
    let d = dirs();
    std::fs::write(
        d.project.path().join("rwgate.toml"),
        "prefix = \"files\"\nmax_threads = 3\nbase_dir = \"data\"\n",
    )
    .unwrap();
    let config = d.config();

    let daemon = startup(&config).await.unwrap();
    assert_eq!(daemon.coordinator_config.prefix, "files");
    assert_eq!(daemon.coordinator_config.max_threads, 3);
    assert_eq!(
        daemon.coordinator_config.base_dir(),
        config.project_root.join("data")
    );
    assert_eq!(daemon.clean_topic(), "files:clean-worker");
    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_config_fails_before_binding() {
    let d = dirs();
    std::fs::write(d.project.path().join("rwgate.toml"), "prefix = \"\"\n").unwrap();
    let config = d.config();

    let result = startup(&config).await;

    assert!(matches!(result, Err(LifecycleError::Config(_))));
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
}
