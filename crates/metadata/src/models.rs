//! Row types for the metadata store.

use crate::error::{MetadataError, MetadataResult};
use parcel_core::upload::{MultipartHandle, PartRecord, UploadId, UploadSession};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Persisted upload session state.
#[derive(Clone, Debug)]
pub struct UploadSessionRow {
    pub upload_id: Uuid,
    pub storage_key: String,
    /// Backend-assigned multipart upload identifier.
    pub multipart_id: String,
    pub total_size: i64,
    pub uploaded_size: i64,
    pub filename: String,
    pub content_type: String,
    /// Opaque client metadata as a JSON object.
    pub custom_metadata: String,
    pub owner_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub completed: bool,
}

impl UploadSessionRow {
    /// Build a row from the in-memory session state.
    pub fn from_session(session: &UploadSession) -> MetadataResult<Self> {
        let custom_metadata = serde_json::to_string(&session.custom_metadata)
            .map_err(|e| MetadataError::Internal(format!("failed to encode metadata: {e}")))?;

        Ok(Self {
            upload_id: *session.upload_id.as_uuid(),
            storage_key: session.storage_key.clone(),
            multipart_id: session.multipart.id.clone(),
            total_size: session.total_size as i64,
            uploaded_size: session.uploaded_size as i64,
            filename: session.filename.clone(),
            content_type: session.content_type.clone(),
            custom_metadata,
            owner_id: session.owner_id.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            completed: session.completed,
        })
    }

    /// Rebuild the in-memory session from this row and its part rows.
    pub fn into_session(self, parts: Vec<UploadPartRow>) -> MetadataResult<UploadSession> {
        let custom_metadata: BTreeMap<String, String> = serde_json::from_str(&self.custom_metadata)
            .map_err(|e| MetadataError::Internal(format!("corrupt metadata JSON: {e}")))?;

        Ok(UploadSession {
            upload_id: UploadId::parse(&self.upload_id.to_string())
                .map_err(|e| MetadataError::Internal(e.to_string()))?,
            multipart: MultipartHandle {
                key: self.storage_key.clone(),
                id: self.multipart_id,
            },
            storage_key: self.storage_key,
            total_size: self.total_size as u64,
            uploaded_size: self.uploaded_size as u64,
            parts: parts.into_iter().map(UploadPartRow::into_part).collect(),
            filename: self.filename,
            content_type: self.content_type,
            custom_metadata,
            owner_id: self.owner_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
            completed: self.completed,
        })
    }
}

/// One accepted part of an upload session.
#[derive(Clone, Debug)]
pub struct UploadPartRow {
    pub upload_id: Uuid,
    pub part_number: i32,
    pub etag: String,
    pub size_bytes: i64,
    pub uploaded_at: OffsetDateTime,
}

impl UploadPartRow {
    /// Build a row from an accepted part.
    pub fn from_part(upload_id: UploadId, part: &PartRecord, uploaded_at: OffsetDateTime) -> Self {
        Self {
            upload_id: *upload_id.as_uuid(),
            part_number: part.part_number as i32,
            etag: part.etag.clone(),
            size_bytes: part.size as i64,
            uploaded_at,
        }
    }

    /// Convert back to the in-memory part record.
    pub fn into_part(self) -> PartRecord {
        PartRecord {
            part_number: self.part_number as u32,
            etag: self.etag,
            size: self.size_bytes as u64,
        }
    }
}

/// The authoritative record of one completed file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecordRow {
    pub file_id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    /// Completion digest returned by the blob store.
    pub checksum: String,
    pub storage_key: String,
    pub owner_id: Option<String>,
    /// Opaque client metadata as a JSON object.
    pub custom_metadata: String,
    pub uploaded_at: OffsetDateTime,
}
