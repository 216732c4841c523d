//! Completed file repository.

use crate::error::MetadataResult;
use crate::models::FileRecordRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for completed file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert the final record for a completed upload.
    async fn insert_file(&self, record: &FileRecordRow) -> MetadataResult<()>;

    /// Point read of a file record by its ID.
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRecordRow>>;
}
