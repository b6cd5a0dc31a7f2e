//! Coordination specs
//!
//! Workers in separate connections contend for the same resources through
//! one daemon.

use crate::prelude::*;
use similar_asserts::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn readers_share_and_writers_wait() {
    let temp = Project::empty();
    let daemon = temp.start();
    let reader = daemon.client("reader").await;
    let writer = daemon.client("writer").await;

    let r1 = reader
        .promised(Action::Read, ResourceMeta::named("data.csv"), None)
        .await
        .unwrap();
    let r2 = reader
        .promised(Action::Read, ResourceMeta::named("./data.csv"), None)
        .await
        .unwrap();
    assert_eq!(r1.resolved_name, r2.resolved_name);

    let pending = tokio::spawn({
        let writer = writer.clone();
        async move { writer.promised_lock(ResourceMeta::named("data.csv"), None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    reader.release(&r1.request_id).unwrap();
    reader.release(&r2.request_id).unwrap();

    let grant = pending.await.unwrap().unwrap();
    assert_eq!(grant.action, Action::Write);
}

#[tokio::test]
async fn unlink_refuses_everything_after() {
    let temp = Project::empty();
    let daemon = temp.start();
    let a = daemon.client("a").await;
    let b = daemon.client("b").await;

    let unlink = a
        .promised(Action::Unlink, ResourceMeta::named("old.log"), None)
        .await
        .unwrap();
    a.release(&unlink.request_id).unwrap();

    let err = b
        .promised(Action::Read, ResourceMeta::named("old.log"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Denied(rwgate_core::Denied {
            status: Status::Deleted,
            ..
        })
    ));
}

#[tokio::test]
async fn killed_worker_releases_its_grants() {
    let temp = Project::empty();
    let daemon = temp.start();
    let holder = daemon.client("holder").await;
    let waiter = daemon.client("waiter").await;

    holder
        .promised_lock(ResourceMeta::named("shared.db"), None)
        .await
        .unwrap();
    let pending = tokio::spawn({
        let waiter = waiter.clone();
        async move { waiter.promised_lock(ResourceMeta::named("shared.db"), None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(holder);

    assert!(pending.await.unwrap().is_ok());
}

#[tokio::test]
async fn generated_names_land_in_project_root() {
    let temp = Project::empty();
    let daemon = temp.start();
    let client = daemon.client("w1").await;

    let grant = client
        .promised_lock(ResourceMeta::generated("tmp"), None)
        .await
        .unwrap();
    let name = std::path::PathBuf::from(grant.resolved_name.unwrap());

    assert_eq!(name.parent(), Some(daemon.project_root().as_path()));
    assert_eq!(name.extension().and_then(|e| e.to_str()), Some("tmp"));
}
