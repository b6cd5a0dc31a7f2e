// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rwgate_core::{Coordinator, CoordinatorConfig, CoordinatorHandle, LocalHub, Status};
use std::sync::Arc;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(2);

struct Fixture {
    dir: TempDir,
    hub: LocalHub,
    config: CoordinatorConfig,
    handle: CoordinatorHandle,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let hub = LocalHub::new();
    let config = CoordinatorConfig {
        base_dir: Some(dir.path().to_path_buf()),
        ..CoordinatorConfig::default()
    };
    let handle = Coordinator::new(config.clone(), hub.endpoint("coordinator")).spawn();
    Fixture {
        dir,
        hub,
        config,
        handle,
    }
}

impl Fixture {
    fn client(&self, worker: &str) -> Client {
        Client::new(
            self.config.client().with_timeout(WAIT),
            self.hub.endpoint(worker),
        )
    }

    fn open(&self, worker: &str, name: &str) -> FileHandle {
        FileHandle::open(self.client(worker), name)
    }
}

#[tokio::test]
async fn write_then_read() {
    let f = fixture();
    let file = f.open("w1", "notes.txt");

    file.write("hello").await.unwrap();

    assert_eq!(file.read_to_string().await.unwrap(), "hello");
    assert_eq!(file.path(), Some(f.dir.path().join("notes.txt")));
    assert_eq!(
        std::fs::read_to_string(f.dir.path().join("notes.txt")).unwrap(),
        "hello"
    );
    f.handle.shutdown().await;
}

#[tokio::test]
async fn append_extends_file() {
    let f = fixture();
    let file = f.open("w1", "log.txt");

    file.append("a\n").await.unwrap();
    file.append("b\n").await.unwrap();

    assert_eq!(file.read().await.unwrap(), b"a\nb\n");
    assert_eq!(file.stat().await.unwrap().len(), 4);
    f.handle.shutdown().await;
}

#[tokio::test]
async fn read_of_missing_file_is_io_error_and_releases() {
    let f = fixture();
    let client = f.client("w1");
    let file = FileHandle::open(client.clone(), "absent");

    let err = file.read().await.unwrap_err();

    assert!(matches!(err, FileError::Io { .. }));
    assert_eq!(client.pending_len(), 0);
    f.handle.shutdown().await;
}

#[tokio::test]
async fn generated_handle_learns_its_name_once() {
    let f = fixture();
    let file = FileHandle::generated(f.client("w1"), Some("json"));
    assert_eq!(file.path(), None);

    file.write("{}").await.unwrap();
    let path = file.path().unwrap();
    assert_eq!(path.parent(), Some(f.dir.path()));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));

    file.append("\n").await.unwrap();
    assert_eq!(file.path(), Some(path.clone()));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}\n");
    f.handle.shutdown().await;
}

#[tokio::test]
async fn unnamed_generated_handle_cannot_unlink() {
    let f = fixture();
    let file = FileHandle::generated(f.client("w1"), None);

    assert!(matches!(file.unlink().await, Err(FileError::Unnamed)));
    f.handle.shutdown().await;
}

#[tokio::test]
async fn lock_blocks_other_writers_until_unlock() {
    let f = fixture();
    let owner = Arc::new(f.open("w1", "shared"));
    let other = Arc::new(f.open("w2", "shared"));

    owner.lock().await.unwrap();
    owner.write("first").await.unwrap();

    let blocked = tokio::spawn({
        let other = Arc::clone(&other);
        async move { other.write("second").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    let window = owner.get_access(AccessMode::Read).await.unwrap();
    assert!(window.is_nested());
    owner.release_access(window).unwrap();
    assert_eq!(owner.read_to_string().await.unwrap(), "first");

    owner.unlock().unwrap();
    blocked.await.unwrap().unwrap();
    assert_eq!(owner.read_to_string().await.unwrap(), "second");
    f.handle.shutdown().await;
}

#[tokio::test]
async fn lock_state_errors() {
    let f = fixture();
    let file = f.open("w1", "f");

    assert!(matches!(file.unlock(), Err(FileError::NotLocked)));
    file.lock().await.unwrap();
    assert!(file.is_locked());
    assert!(matches!(file.lock().await, Err(FileError::AlreadyLocked)));
    assert!(matches!(file.unlink().await, Err(FileError::UnlinkWhileLocked)));
    file.unlock().unwrap();
    assert!(!file.is_locked());
    f.handle.shutdown().await;
}

#[tokio::test]
async fn unlink_removes_file_and_refuses_later_access() {
    let f = fixture();
    let file = f.open("w1", "doomed");
    file.write("bye").await.unwrap();

    file.unlink().await.unwrap();

    assert!(!f.dir.path().join("doomed").exists());
    let late = f.open("w2", "doomed");
    let err = late.read().await.unwrap_err();
    assert_eq!(err.denied_status(), Some(Status::Deleted));
    late.unlink().await.unwrap();
    f.handle.shutdown().await;
}

#[tokio::test]
async fn concurrent_unlinks_both_succeed() {
    let f = fixture();
    let a = Arc::new(f.open("w1", "twice"));
    let b = Arc::new(f.open("w2", "twice"));
    a.lock().await.unwrap();
    a.write("x").await.unwrap();

    let unlink_b = tokio::spawn({
        let b = Arc::clone(&b);
        async move { b.unlink().await }
    });
    let reader = f.open("w3", "twice");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let unlink_c = tokio::spawn({
        let c = f.open("w4", "twice");
        async move { c.unlink().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    a.unlock().unwrap();
    unlink_b.await.unwrap().unwrap();
    unlink_c.await.unwrap().unwrap();

    assert!(!f.dir.path().join("twice").exists());
    assert_eq!(
        reader.read().await.unwrap_err().denied_status(),
        Some(Status::Deleted)
    );
    f.handle.shutdown().await;
}

#[tokio::test]
async fn transactions_run_one_at_a_time() {
    let f = fixture();
    let file = Arc::new(f.open("w1", "counter"));
    file.write("0").await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let file = Arc::clone(&file);
        tasks.push(tokio::spawn(async move {
            file.transaction(|path| async move {
                let n: u32 = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| FileError::io(&path, e))?
                    .parse()
                    .unwrap();
                tokio::task::yield_now().await;
                tokio::fs::write(&path, (n + 1).to_string())
                    .await
                    .map_err(|e| FileError::io(&path, e))
            })
            .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(file.read_to_string().await.unwrap(), "5");
    assert!(!file.is_locked());
    f.handle.shutdown().await;
}

#[tokio::test]
async fn transaction_inside_lock_keeps_lock() {
    let f = fixture();
    let file = f.open("w1", "held");
    file.lock().await.unwrap();

    let path = file.transaction(|path| async move { Ok(path) }).await.unwrap();

    assert_eq!(path, f.dir.path().join("held"));
    assert!(file.is_locked());
    file.unlock().unwrap();
    f.handle.shutdown().await;
}

#[tokio::test]
async fn reads_on_the_handle_wait_for_a_running_transaction() {
    let f = fixture();
    let file = Arc::new(f.open("w1", "ledger"));
    file.write("start").await.unwrap();

    let (halfway_tx, halfway_rx) = tokio::sync::oneshot::channel();
    let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();
    let transaction = tokio::spawn({
        let file = Arc::clone(&file);
        async move {
            file.transaction(|path| async move {
                tokio::fs::write(&path, "partial")
                    .await
                    .map_err(|e| FileError::io(&path, e))?;
                halfway_tx.send(()).unwrap();
                finish_rx.await.unwrap();
                tokio::fs::write(&path, "done")
                    .await
                    .map_err(|e| FileError::io(&path, e))
            })
            .await
        }
    });
    halfway_rx.await.unwrap();

    let reader = tokio::spawn({
        let file = Arc::clone(&file);
        async move { file.read_to_string().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reader.is_finished());

    finish_tx.send(()).unwrap();
    transaction.await.unwrap().unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), "done");
    assert!(!file.is_locked());
    f.handle.shutdown().await;
}

#[tokio::test]
async fn handle_io_inside_a_transaction_nests() {
    let f = fixture();
    let file = f.open("w1", "inner");
    file.write("before").await.unwrap();

    let seen = file
        .transaction(|_| async {
            let seen = file.read_to_string().await?;
            file.append(" after").await?;
            Ok(seen)
        })
        .await
        .unwrap();

    assert_eq!(seen, "before");
    assert_eq!(file.read_to_string().await.unwrap(), "before after");
    f.handle.shutdown().await;
}
