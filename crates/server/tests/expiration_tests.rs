//! Session TTL, timer, and sweep behavior.

mod common;

use bytes::Bytes;
use common::{create_request, mock_env, upload_id_for};
use parcel_metadata::models::UploadSessionRow;
use parcel_server::UploadError;
use parcel_server::actor::CreateAction;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Poll until the condition holds or the deadline passes.
async fn wait_for(mut condition: impl AsyncFnMut() -> bool) {
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within deadline");
}

fn seeded_row(upload_id: Uuid, expires_in: time::Duration, completed: bool) -> UploadSessionRow {
    let now = OffsetDateTime::now_utc();
    UploadSessionRow {
        upload_id,
        storage_key: "anonymous/20260806/seeded.bin".to_string(),
        multipart_id: "mp-seeded".to_string(),
        total_size: 100,
        uploaded_size: 0,
        filename: "seeded.bin".to_string(),
        content_type: "application/octet-stream".to_string(),
        custom_metadata: "{}".to_string(),
        owner_id: None,
        created_at: now - time::Duration::hours(1),
        expires_at: now + expires_in,
        completed,
    }
}

#[tokio::test]
async fn timer_cleans_up_abandoned_session() {
    let env = mock_env(|c| c.server.session_ttl_secs = 0);
    let id = upload_id_for(None, "abandoned.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "abandoned.bin", 1000))
        .await
        .unwrap();

    // The timer fires at the (immediate) expiry and clears the session.
    wait_for(async || matches!(actor.status().await, Err(UploadError::NotFound))).await;

    // Give any duplicate firing a chance to misbehave, then check the
    // multipart upload was aborted exactly once.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(env.storage.aborted(), 1);
    assert!(env.metadata.session_row(*id.as_uuid()).is_none());
}

#[tokio::test]
async fn late_timer_fire_after_completion_is_noop() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "done.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "done.bin", 10))
        .await
        .unwrap();
    let outcome = actor
        .upload_part(0, Bytes::from(vec![1u8; 10]))
        .await
        .unwrap();
    assert!(outcome.completed);

    // Simulate the timer racing its cancellation and firing anyway.
    actor.expire().await.unwrap();

    let status = actor.status().await.unwrap();
    assert!(status.completed);
    assert_eq!(env.storage.aborted(), 0);
    assert!(env.metadata.session_row(*id.as_uuid()).is_some());
}

#[tokio::test]
async fn expired_session_is_replaced_on_create() {
    let env = mock_env(|c| c.server.session_ttl_secs = 0);
    let id = upload_id_for(Some("alice"), "redo.bin");
    let actor = env.registry.resolve(id).await;

    let first = actor
        .create_or_resume(create_request(Some("alice"), "redo.bin", 1000))
        .await
        .unwrap();
    assert_eq!(first.action, CreateAction::Created);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // Past its TTL the session is abandoned: the same create gets a fresh
    // session instead of a resume.
    let second = actor
        .create_or_resume(create_request(Some("alice"), "redo.bin", 1000))
        .await
        .unwrap();
    assert_eq!(second.action, CreateAction::Created);
    assert_eq!(second.uploaded_size, 0);
    assert_eq!(env.storage.opened(), 2);
    assert!(env.storage.aborted() >= 1);
}

#[tokio::test]
async fn sweep_expires_persisted_sessions_from_before_a_restart() {
    let env = mock_env(|_| {});
    let upload_id = Uuid::new_v4();

    // A session that expired while the process was down: rows exist but no
    // actor has seen them yet.
    env.metadata
        .seed_session(seeded_row(upload_id, time::Duration::seconds(-30), false));

    let swept = env.registry.sweep().await.unwrap();
    assert_eq!(swept, 1);
    assert!(env.metadata.session_row(upload_id).is_none());
    assert_eq!(env.storage.aborted(), 1);

    // Nothing left to sweep.
    assert_eq!(env.registry.sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn sweep_reaps_completed_sessions_without_aborting() {
    let env = mock_env(|_| {});
    let upload_id = Uuid::new_v4();

    env.metadata
        .seed_session(seeded_row(upload_id, time::Duration::seconds(-30), true));

    let swept = env.registry.sweep().await.unwrap();
    assert_eq!(swept, 1);
    assert!(env.metadata.session_row(upload_id).is_none());
    // A completed upload's handle is already finalized; nothing to abort.
    assert_eq!(env.storage.aborted(), 0);
}

#[tokio::test]
async fn recover_rearms_live_sessions_and_reaps_expired_ones() {
    let env = mock_env(|_| {});
    let live_id = Uuid::new_v4();
    let dead_id = Uuid::new_v4();

    env.metadata
        .seed_session(seeded_row(live_id, time::Duration::hours(1), false));
    env.metadata
        .seed_session(seeded_row(dead_id, time::Duration::seconds(-30), false));

    let stats = env.registry.recover().await.unwrap();
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.rearmed, 1);

    assert!(env.metadata.session_row(dead_id).is_none());
    assert!(env.metadata.session_row(live_id).is_some());
}

#[tokio::test]
async fn registry_prune_drops_cleared_actors() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "prune.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "prune.bin", 10))
        .await
        .unwrap();
    assert_eq!(env.registry.len().await, 1);

    actor.cancel().await.unwrap();
    env.registry.prune().await;
    assert!(env.registry.is_empty().await);
}
