//! File handle specs
//!
//! Real files in the project root, guarded by a daemon.

use crate::prelude::*;
use similar_asserts::assert_eq;

#[tokio::test]
async fn handles_in_two_workers_see_each_others_writes() {
    let temp = Project::empty();
    let daemon = temp.start();
    let a = daemon.open("a", "shared.txt").await;
    let b = daemon.open("b", "shared.txt").await;

    a.write("from a").await.unwrap();
    assert_eq!(b.read_to_string().await.unwrap().as_str(), "from a");

    b.append(", then b").await.unwrap();
    assert_eq!(
        std::fs::read_to_string(temp.path().join("shared.txt")).unwrap(),
        "from a, then b".to_string()
    );
}

#[tokio::test]
async fn transactions_across_workers_do_not_lose_updates() {
    let temp = Project::empty();
    temp.file("count", "0");
    let daemon = temp.start();

    let mut tasks = Vec::new();
    for worker in ["a", "b", "c"] {
        let handle = Arc::new(daemon.open(worker, "count").await);
        for _ in 0..4 {
            let handle = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move {
                handle
                    .transaction(|path| async move {
                        let n: u32 = tokio::fs::read_to_string(&path)
                            .await
                            .map_err(|e| FileError::io(&path, e))?
                            .trim()
                            .parse()
                            .unwrap();
                        tokio::fs::write(&path, (n + 1).to_string())
                            .await
                            .map_err(|e| FileError::io(&path, e))
                    })
                    .await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(
        std::fs::read_to_string(temp.path().join("count")).unwrap(),
        "12".to_string()
    );
}

#[tokio::test]
async fn unlink_deletes_the_file() {
    let temp = Project::empty();
    temp.file("scratch.bin", "xx");
    let daemon = temp.start();
    let file = daemon.open("a", "scratch.bin").await;

    file.unlink().await.unwrap();

    assert!(!temp.path().join("scratch.bin").exists());
    let again = daemon.open("b", "scratch.bin").await;
    assert_eq!(
        again.write("back").await.unwrap_err().denied_status(),
        Some(Status::Deleted)
    );
}
