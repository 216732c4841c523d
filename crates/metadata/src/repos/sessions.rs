//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{UploadPartRow, UploadSessionRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for upload session operations.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create a new upload session.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by ID.
    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Get the ordered part rows of a session.
    async fn get_parts(&self, upload_id: Uuid) -> MetadataResult<Vec<UploadPartRow>>;

    /// Append a part and advance the session's uploaded size in one
    /// transaction. Fails if the session is missing or already completed.
    async fn append_part(
        &self,
        upload_id: Uuid,
        part: &UploadPartRow,
        new_uploaded_size: i64,
    ) -> MetadataResult<()>;

    /// Set the session's completed flag.
    async fn set_completed(&self, upload_id: Uuid, completed: bool) -> MetadataResult<()>;

    /// Delete a session and its parts.
    async fn delete_session(&self, upload_id: Uuid) -> MetadataResult<()>;

    /// Get sessions whose expiry is at or before `now`.
    async fn get_expired_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Get incomplete sessions whose expiry is after `now` (for timer
    /// rearming after a restart).
    async fn get_live_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Count sessions that have not completed yet.
    async fn count_active_sessions(&self) -> MetadataResult<u64>;
}
