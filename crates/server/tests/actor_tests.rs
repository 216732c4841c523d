//! Upload session actor behavior tests against mock stores.

mod common;

use bytes::Bytes;
use common::{create_request, mock_env, upload_id_for};
use parcel_metadata::repos::{FileRepo, SessionRepo};
use parcel_server::UploadError;
use parcel_server::actor::CreateAction;
use std::sync::atomic::Ordering;

const MIB: u64 = 1024 * 1024;

#[tokio::test]
async fn contiguous_appends_accumulate_and_number_parts() {
    let env = mock_env(|_| {});
    let id = upload_id_for(Some("alice"), "data.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(Some("alice"), "data.bin", 100))
        .await
        .unwrap();

    let chunks: [(u64, usize); 3] = [(0, 30), (30, 30), (60, 40)];
    for (offset, size) in chunks {
        let outcome = actor
            .upload_part(offset, Bytes::from(vec![7u8; size]))
            .await
            .unwrap();
        assert_eq!(outcome.uploaded_size, offset + size as u64);
    }

    let status = actor.status().await.unwrap();
    assert_eq!(status.uploaded_size, 100);
    assert!(status.completed);

    // Parts are numbered 1..N with no gaps, sizes match the chunks.
    let row = env.metadata.session_row(*id.as_uuid()).unwrap();
    assert_eq!(row.uploaded_size, 100);
    let parts = env
        .metadata
        .get_parts(*id.as_uuid())
        .await
        .unwrap();
    assert_eq!(
        parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(parts.iter().map(|p| p.size_bytes).sum::<i64>(), 100);
}

#[tokio::test]
async fn mismatched_offset_is_rejected_without_state_change() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "c.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "c.bin", 1000))
        .await
        .unwrap();

    // Scenario: append at offset 500 when the server offset is 0.
    match actor.upload_part(500, Bytes::from(vec![0u8; 100])).await {
        Err(UploadError::OffsetMismatch { server_offset }) => assert_eq!(server_offset, 0),
        other => panic!("unexpected result: {other:?}"),
    }

    let status = actor.status().await.unwrap();
    assert_eq!(status.uploaded_size, 0);
    assert_eq!(env.metadata.part_count(*id.as_uuid()), 0);

    // Stale offset after progress is also rejected with the current offset.
    actor
        .upload_part(0, Bytes::from(vec![0u8; 100]))
        .await
        .unwrap();
    match actor.upload_part(0, Bytes::from(vec![0u8; 100])).await {
        Err(UploadError::OffsetMismatch { server_offset }) => assert_eq!(server_offset, 100),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn create_twice_resumes_and_opens_multipart_once() {
    let env = mock_env(|_| {});
    let id = upload_id_for(Some("alice"), "resume.bin");
    let actor = env.registry.resolve(id).await;

    let first = actor
        .create_or_resume(create_request(Some("alice"), "resume.bin", 1000))
        .await
        .unwrap();
    assert_eq!(first.action, CreateAction::Created);
    assert_eq!(first.uploaded_size, 0);

    actor
        .upload_part(0, Bytes::from(vec![1u8; 400]))
        .await
        .unwrap();

    let second = actor
        .create_or_resume(create_request(Some("alice"), "resume.bin", 1000))
        .await
        .unwrap();
    assert_eq!(second.action, CreateAction::Resumed);
    assert_eq!(second.uploaded_size, 400);
    assert_eq!(second.expires_at, first.expires_at);

    // Resume must not have touched the blob store again.
    assert_eq!(env.storage.opened(), 1);
}

#[tokio::test]
async fn same_identity_different_storage_key_conflicts() {
    let env = mock_env(|_| {});
    let id = upload_id_for(Some("alice"), "daily.log");
    let actor = env.registry.resolve(id).await;

    let mut request = create_request(Some("alice"), "daily.log", 1000);
    actor.create_or_resume(request.clone()).await.unwrap();

    // Same derived identity, different target key (e.g. created on a
    // different day) is a conflict, not a resume.
    request.storage_key = "alice/19990101/daily.log".to_string();
    match actor.create_or_resume(request).await {
        Err(UploadError::Conflict) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(env.storage.opened(), 1);
}

#[tokio::test]
async fn oversized_declared_length_is_rejected_before_any_io() {
    let env = mock_env(|c| c.server.max_upload_size = 1000);
    let id = upload_id_for(None, "big.bin");
    let actor = env.registry.resolve(id).await;

    match actor
        .create_or_resume(create_request(None, "big.bin", 1001))
        .await
    {
        Err(UploadError::TooLarge { size, max }) => {
            assert_eq!(size, 1001);
            assert_eq!(max, 1000);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(env.storage.opened(), 0);
    assert!(actor.status().await.is_err());
}

#[tokio::test]
async fn chunk_past_declared_length_is_rejected() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "exact.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "exact.bin", 100))
        .await
        .unwrap();

    match actor.upload_part(0, Bytes::from(vec![0u8; 150])).await {
        Err(UploadError::ChunkBeyondLength { total, .. }) => assert_eq!(total, 100),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(actor.status().await.unwrap().uploaded_size, 0);
}

#[tokio::test]
async fn completion_writes_exactly_one_record_and_tail_call_is_noop() {
    let env = mock_env(|_| {});
    let id = upload_id_for(Some("bob"), "b.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(Some("bob"), "b.bin", 1000))
        .await
        .unwrap();

    let outcome = actor
        .upload_part(0, Bytes::from(vec![2u8; 1000]))
        .await
        .unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.uploaded_size, 1000);
    assert_eq!(env.metadata.insert_file_calls(), 1);
    assert_eq!(env.storage.completed(), 1);

    let record = env.metadata.get_file(*id.as_uuid()).await.unwrap().unwrap();
    assert_eq!(record.size_bytes, 1000);
    assert_eq!(record.owner_id.as_deref(), Some("bob"));

    // Scenario: repeating the last chunk at the new offset is a completed
    // no-op, not a new part and not a second record.
    let repeat = actor
        .upload_part(1000, Bytes::from(vec![2u8; 1000]))
        .await
        .unwrap();
    assert!(repeat.completed);
    assert_eq!(repeat.uploaded_size, 1000);
    assert_eq!(env.metadata.insert_file_calls(), 1);
    assert_eq!(env.metadata.part_count(*id.as_uuid()), 1);
    assert_eq!(env.storage.completed(), 1);
}

#[tokio::test]
async fn two_chunk_upload_completes_with_final_record() {
    // End-to-end scenario A: 10 MiB declared, two 5 MiB chunks.
    let env = mock_env(|c| {
        c.server.max_upload_size = 20 * MIB;
        c.server.max_chunk_size = 10 * MIB;
    });
    let id = upload_id_for(Some("alice"), "video.mp4");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(Some("alice"), "video.mp4", 10 * MIB))
        .await
        .unwrap();

    let first = actor
        .upload_part(0, Bytes::from(vec![0u8; (5 * MIB) as usize]))
        .await
        .unwrap();
    assert_eq!(first.uploaded_size, 5 * MIB);
    assert!(!first.completed);

    let second = actor
        .upload_part(5 * MIB, Bytes::from(vec![0u8; (5 * MIB) as usize]))
        .await
        .unwrap();
    assert_eq!(second.uploaded_size, 10 * MIB);
    assert!(second.completed);

    assert_eq!(env.metadata.insert_file_calls(), 1);
    let record = env.metadata.get_file(*id.as_uuid()).await.unwrap().unwrap();
    assert_eq!(record.size_bytes, (10 * MIB) as i64);
}

#[tokio::test]
async fn failed_blob_completion_leaves_session_active_and_retryable() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "retry.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "retry.bin", 500))
        .await
        .unwrap();

    env.storage.fail_complete.store(true, Ordering::SeqCst);
    match actor.upload_part(0, Bytes::from(vec![3u8; 500])).await {
        Err(UploadError::Storage(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // The accepted range survived; only completion failed.
    let status = actor.status().await.unwrap();
    assert_eq!(status.uploaded_size, 500);
    assert!(!status.completed);
    assert_eq!(env.metadata.insert_file_calls(), 0);

    // An append at the current offset re-drives completion.
    env.storage.fail_complete.store(false, Ordering::SeqCst);
    let outcome = actor
        .upload_part(500, Bytes::from(vec![3u8; 500]))
        .await
        .unwrap();
    assert!(outcome.completed);
    assert_eq!(env.metadata.insert_file_calls(), 1);
    assert_eq!(env.metadata.part_count(*id.as_uuid()), 1);
}

#[tokio::test]
async fn verification_failure_deletes_blob_and_reverts_completion() {
    let env = mock_env(|_| {});
    let id = upload_id_for(Some("carol"), "v.bin");
    let actor = env.registry.resolve(id).await;

    let request = create_request(Some("carol"), "v.bin", 200);
    let storage_key = request.storage_key.clone();
    actor.create_or_resume(request).await.unwrap();

    env.metadata.drop_inserted_files.store(true, Ordering::SeqCst);
    match actor.upload_part(0, Bytes::from(vec![4u8; 200])).await {
        Err(UploadError::ConsistencyFailure) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // The orphaned object was deleted and the session reopened.
    assert_eq!(env.storage.deleted_keys(), vec![storage_key]);
    let status = actor.status().await.unwrap();
    assert!(!status.completed);
    assert!(!env.metadata.session_row(*id.as_uuid()).unwrap().completed);

    // Once the store behaves, the retry completes and verifies.
    env.metadata.drop_inserted_files.store(false, Ordering::SeqCst);
    let outcome = actor
        .upload_part(200, Bytes::from(vec![4u8; 200]))
        .await
        .unwrap();
    assert!(outcome.completed);
    assert!(env.metadata.get_file(*id.as_uuid()).await.unwrap().is_some());
}

#[tokio::test]
async fn cancel_aborts_multipart_and_clears_state() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "gone.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "gone.bin", 1000))
        .await
        .unwrap();
    actor
        .upload_part(0, Bytes::from(vec![5u8; 100]))
        .await
        .unwrap();

    actor.cancel().await.unwrap();
    assert_eq!(env.storage.aborted(), 1);
    assert!(matches!(actor.status().await, Err(UploadError::NotFound)));
    assert!(env.metadata.session_row(*id.as_uuid()).is_none());

    // Canceling again is a no-op.
    actor.cancel().await.unwrap();
    assert_eq!(env.storage.aborted(), 1);
}

#[tokio::test]
async fn zero_length_upload_completes_with_one_empty_part() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "empty.txt");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "empty.txt", 0))
        .await
        .unwrap();

    let outcome = actor.upload_part(0, Bytes::new()).await.unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.uploaded_size, 0);

    let record = env.metadata.get_file(*id.as_uuid()).await.unwrap().unwrap();
    assert_eq!(record.size_bytes, 0);
    assert_eq!(env.metadata.part_count(*id.as_uuid()), 1);
}

#[tokio::test]
async fn append_to_unknown_session_is_not_found() {
    let env = mock_env(|_| {});
    let actor = env
        .registry
        .resolve(upload_id_for(None, "never-created.bin"))
        .await;

    match actor.upload_part(0, Bytes::from_static(b"data")).await {
        Err(UploadError::NotFound) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(actor.status().await, Err(UploadError::NotFound)));
}

#[tokio::test]
async fn failed_part_upload_leaves_offset_unchanged() {
    let env = mock_env(|_| {});
    let id = upload_id_for(None, "flaky.bin");
    let actor = env.registry.resolve(id).await;

    actor
        .create_or_resume(create_request(None, "flaky.bin", 300))
        .await
        .unwrap();

    env.storage.fail_upload_part.store(true, Ordering::SeqCst);
    assert!(
        actor
            .upload_part(0, Bytes::from(vec![6u8; 100]))
            .await
            .is_err()
    );
    assert_eq!(actor.status().await.unwrap().uploaded_size, 0);
    assert_eq!(env.metadata.part_count(*id.as_uuid()), 0);

    // The identical request succeeds once the backend recovers.
    env.storage.fail_upload_part.store(false, Ordering::SeqCst);
    let outcome = actor
        .upload_part(0, Bytes::from(vec![6u8; 100]))
        .await
        .unwrap();
    assert_eq!(outcome.uploaded_size, 100);
}
