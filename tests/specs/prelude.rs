//! Shared fixtures for the behavioral specs
//!
//! Each [`Project`] gets its own project root and state directory, so
//! daemons started by different specs never share a socket or pid file.

#![allow(dead_code)]

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use similar_asserts::assert_eq;
use tempfile::TempDir;

pub use rwgate_core::{Action, Client, ClientError, CoordinatorConfig, ResourceMeta, Status};
pub use rwgate_daemon::{Config, SocketTransport};
pub use rwgate_file::{FileError, FileHandle};
pub use std::sync::Arc;

/// Upper bound for anything a spec polls for
pub const SPEC_WAIT_MAX_MS: u64 = 5000;

/// Timeout handed to clients so a hung grant fails the spec
pub const GRANT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `check` until it holds or `max_ms` elapses
pub fn wait_for(max_ms: u64, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(max_ms);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

pub struct Project {
    root: TempDir,
    state: TempDir,
}

impl Project {
    pub fn empty() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            state: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Stands in for both XDG_STATE_HOME and RWGATE_SOCKET_DIR
    pub fn state_path(&self) -> &Path {
        self.state.path()
    }

    pub fn file(&self, rel: &str, content: &str) {
        let path = self.root.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    /// The paths the daemon derives for this project
    pub fn daemon_config(&self) -> Config {
        Config::in_dirs(
            self.root.path(),
            &self.state.path().join("rwgate"),
            self.state.path(),
        )
        .unwrap()
    }

    /// Command running `rwgated` against this project
    pub fn rwgated(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin("rwgated"));
        cmd.arg(self.root.path())
            .env("XDG_STATE_HOME", self.state.path())
            .env("RWGATE_SOCKET_DIR", self.state.path())
            .env("RUST_LOG", "debug");
        cmd
    }

    /// Start the daemon and wait for it to print READY
    pub fn start(&self) -> Daemon {
        let mut child = self
            .rwgated()
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let stdout = child.stdout.take().unwrap();
        let mut first = String::new();
        BufReader::new(stdout).read_line(&mut first).unwrap();
        assert_eq!(first.trim(), "READY");

        Daemon {
            child,
            config: self.daemon_config(),
        }
    }
}

/// A running `rwgated`, killed when dropped
pub struct Daemon {
    child: Child,
    pub config: Config,
}

impl Daemon {
    pub fn socket(&self) -> &Path {
        &self.config.socket_path
    }

    pub async fn client(&self, worker: &str) -> Client {
        let transport = SocketTransport::connect(self.socket(), worker)
            .await
            .unwrap();
        let config = CoordinatorConfig::default().client().with_timeout(GRANT_TIMEOUT);
        Client::new(config, transport)
    }

    pub async fn open(&self, worker: &str, name: &str) -> FileHandle {
        FileHandle::open(self.client(worker).await, name)
    }

    pub fn log(&self) -> String {
        std::fs::read_to_string(&self.config.log_path).unwrap_or_default()
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn project_root(&self) -> PathBuf {
        self.config.project_root.clone()
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
