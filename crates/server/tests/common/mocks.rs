//! In-memory mock stores with call counting and failure injection.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::upload::MultipartHandle;
use parcel_metadata::error::{MetadataError, MetadataResult};
use parcel_metadata::models::{FileRecordRow, UploadPartRow, UploadSessionRow};
use parcel_metadata::repos::{FileRepo, SessionRepo};
use parcel_metadata::store::MetadataStore;
use parcel_storage::error::{StorageError, StorageResult};
use parcel_storage::traits::{BlobStore, CompletedPart, CompletionDigest, PartDigest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use uuid::Uuid;

/// Mock blob store recording multipart calls.
#[derive(Default)]
pub struct MockBlobStore {
    pub opened: AtomicUsize,
    pub completed: AtomicUsize,
    pub aborted: AtomicUsize,
    /// Keys passed to delete().
    pub deleted: Mutex<Vec<String>>,
    /// handle id -> (part_number, size) in upload order.
    pub parts: Mutex<HashMap<String, Vec<(u32, usize)>>>,
    /// Fail the next upload_part calls while set.
    pub fail_upload_part: AtomicBool,
    /// Fail the next complete_multipart calls while set.
    pub fail_complete: AtomicBool,
}

impl MockBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn parts_for(&self, handle: &MultipartHandle) -> Vec<(u32, usize)> {
        self.parts
            .lock()
            .unwrap()
            .get(&handle.id)
            .cloned()
            .unwrap_or_default()
    }

    fn io_error(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(what.to_string()))
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn open_multipart(
        &self,
        key: &str,
        _content_type: &str,
    ) -> StorageResult<MultipartHandle> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let id = Uuid::new_v4().to_string();
        self.parts.lock().unwrap().insert(id.clone(), Vec::new());
        Ok(MultipartHandle {
            key: key.to_string(),
            id,
        })
    }

    async fn upload_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<PartDigest> {
        if self.fail_upload_part.load(Ordering::SeqCst) {
            return Err(Self::io_error("injected upload_part failure"));
        }

        let mut parts = self.parts.lock().unwrap();
        let entry = parts
            .get_mut(&handle.id)
            .ok_or_else(|| StorageError::MultipartNotFound(handle.id.clone()))?;
        entry.push((part_number, data.len()));

        Ok(PartDigest(format!("etag-{part_number}")))
    }

    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> StorageResult<CompletionDigest> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(Self::io_error("injected complete failure"));
        }
        if parts.is_empty() {
            return Err(StorageError::InvalidPart("no parts".to_string()));
        }
        if !self.parts.lock().unwrap().contains_key(&handle.id) {
            return Err(StorageError::MultipartNotFound(handle.id.clone()));
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionDigest(format!("digest-{}", parts.len())))
    }

    async fn abort_multipart(&self, handle: &MultipartHandle) -> StorageResult<()> {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        self.parts.lock().unwrap().remove(&handle.id);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

/// Mock metadata store with failure injection for the verification path.
#[derive(Default)]
pub struct MockMetadataStore {
    sessions: Mutex<HashMap<Uuid, UploadSessionRow>>,
    parts: Mutex<HashMap<Uuid, Vec<UploadPartRow>>>,
    files: Mutex<HashMap<Uuid, FileRecordRow>>,
    pub insert_file_calls: AtomicUsize,
    /// Report insert success but store nothing, so the read-back
    /// verification finds the record absent.
    pub drop_inserted_files: AtomicBool,
    /// Fail insert_file outright.
    pub fail_insert_file: AtomicBool,
}

impl MockMetadataStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_file_calls(&self) -> usize {
        self.insert_file_calls.load(Ordering::SeqCst)
    }

    pub fn session_row(&self, upload_id: Uuid) -> Option<UploadSessionRow> {
        self.sessions.lock().unwrap().get(&upload_id).cloned()
    }

    pub fn part_count(&self, upload_id: Uuid) -> usize {
        self.parts
            .lock()
            .unwrap()
            .get(&upload_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Insert a raw session row, bypassing the actor (restart simulation).
    pub fn seed_session(&self, row: UploadSessionRow) {
        self.sessions.lock().unwrap().insert(row.upload_id, row);
    }
}

#[async_trait]
impl SessionRepo for MockMetadataStore {
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&session.upload_id) {
            return Err(MetadataError::AlreadyExists("upload session".to_string()));
        }
        sessions.insert(session.upload_id, session.clone());
        Ok(())
    }

    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
        Ok(self.sessions.lock().unwrap().get(&upload_id).cloned())
    }

    async fn get_parts(&self, upload_id: Uuid) -> MetadataResult<Vec<UploadPartRow>> {
        Ok(self
            .parts
            .lock()
            .unwrap()
            .get(&upload_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_part(
        &self,
        upload_id: Uuid,
        part: &UploadPartRow,
        new_uploaded_size: i64,
    ) -> MetadataResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&upload_id)
            .filter(|s| !s.completed)
            .ok_or_else(|| MetadataError::NotFound(format!("open upload session {upload_id}")))?;

        let mut parts = self.parts.lock().unwrap();
        let entry = parts.entry(upload_id).or_default();
        if entry.iter().any(|p| p.part_number == part.part_number) {
            return Err(MetadataError::AlreadyExists("upload part".to_string()));
        }
        entry.push(part.clone());
        session.uploaded_size = new_uploaded_size;
        Ok(())
    }

    async fn set_completed(&self, upload_id: Uuid, completed: bool) -> MetadataResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&upload_id)
            .ok_or_else(|| MetadataError::NotFound(format!("upload session {upload_id}")))?;
        session.completed = completed;
        Ok(())
    }

    async fn delete_session(&self, upload_id: Uuid) -> MetadataResult<()> {
        self.sessions.lock().unwrap().remove(&upload_id);
        self.parts.lock().unwrap().remove(&upload_id);
        Ok(())
    }

    async fn get_expired_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>> {
        let sessions = self.sessions.lock().unwrap();
        let mut rows: Vec<_> = sessions
            .values()
            .filter(|s| s.expires_at <= now)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.expires_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn get_live_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>> {
        let sessions = self.sessions.lock().unwrap();
        let mut rows: Vec<_> = sessions
            .values()
            .filter(|s| s.expires_at > now && !s.completed)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.expires_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count_active_sessions(&self) -> MetadataResult<u64> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| !s.completed)
            .count() as u64)
    }
}

#[async_trait]
impl FileRepo for MockMetadataStore {
    async fn insert_file(&self, record: &FileRecordRow) -> MetadataResult<()> {
        self.insert_file_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_insert_file.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal(
                "injected insert_file failure".to_string(),
            ));
        }
        if self.drop_inserted_files.load(Ordering::SeqCst) {
            // Pretend success without storing: the verification read-back
            // will find nothing.
            return Ok(());
        }

        let mut files = self.files.lock().unwrap();
        if files.contains_key(&record.file_id) {
            return Err(MetadataError::AlreadyExists("file record".to_string()));
        }
        files.insert(record.file_id, record.clone());
        Ok(())
    }

    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRecordRow>> {
        Ok(self.files.lock().unwrap().get(&file_id).cloned())
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }
}
