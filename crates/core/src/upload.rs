//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

/// UUIDv5 namespace for deriving upload IDs from session identity keys.
const UPLOAD_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1d, 0xe2, 0x4a, 0x0f, 0x5c, 0x4e, 0x8b, 0x92, 0x3a, 0x71, 0xc6, 0x5d, 0x09, 0xe4, 0x17,
]);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive the upload ID for a session identity key.
    ///
    /// The same identity key always maps to the same ID, so a retried or
    /// resumed create request resolves to the same session.
    pub fn derive(identity: &str) -> Self {
        Self(Uuid::new_v5(&UPLOAD_ID_NAMESPACE, identity.as_bytes()))
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid upload ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle for an open multipart upload at the blob store.
///
/// Carries everything a backend needs to upload further parts or to
/// complete/abort the upload. Persisted with the session so a restarted
/// process can keep driving the same multipart upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartHandle {
    /// Object key the upload will materialize at.
    pub key: String,
    /// Backend-assigned multipart upload identifier.
    pub id: String,
}

/// One accepted part within a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    /// 1-based part number, contiguous and strictly increasing.
    pub part_number: u32,
    /// Content digest ("etag") returned by the blob store for this part.
    pub etag: String,
    /// Part size in bytes.
    pub size: u64,
}

/// An upload session tracking resumable upload state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub upload_id: UploadId,
    /// Target key in the blob store. Immutable once set.
    pub storage_key: String,
    /// Open multipart upload handle at the blob store.
    pub multipart: MultipartHandle,
    /// Declared final size in bytes, fixed at creation.
    pub total_size: u64,
    /// Bytes durably accepted so far. Always equals the sum of part sizes.
    pub uploaded_size: u64,
    /// Accepted parts, append-only, numbered contiguously from 1.
    pub parts: Vec<PartRecord>,
    /// Original filename, fixed at creation.
    pub filename: String,
    /// MIME content type, fixed at creation.
    pub content_type: String,
    /// Opaque client-supplied metadata, carried to the final file record.
    pub custom_metadata: BTreeMap<String, String>,
    /// Identity of the uploading principal, if known.
    pub owner_id: Option<String>,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// True once the multipart upload has been finalized.
    pub completed: bool,
}

impl UploadSession {
    /// Create a new upload session.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upload_id: UploadId,
        storage_key: String,
        multipart: MultipartHandle,
        total_size: u64,
        filename: String,
        content_type: String,
        custom_metadata: BTreeMap<String, String>,
        owner_id: Option<String>,
        ttl: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            upload_id,
            storage_key,
            multipart,
            total_size,
            uploaded_size: 0,
            parts: Vec::new(),
            filename,
            content_type,
            custom_metadata,
            owner_id,
            created_at: now,
            expires_at: now + ttl,
            completed: false,
        }
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    /// Part number the next accepted chunk will be stored under.
    pub fn next_part_number(&self) -> u32 {
        self.parts.len() as u32 + 1
    }

    /// Bytes still outstanding before the declared total is reached.
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.uploaded_size)
    }

    /// Check if every declared byte has been accepted.
    pub fn is_full(&self) -> bool {
        self.uploaded_size == self.total_size
    }

    /// Append an accepted part and advance the uploaded size.
    ///
    /// Enforces the session invariants: parts are numbered contiguously
    /// from 1, a completed session accepts no further parts, and the
    /// uploaded size never exceeds the declared total.
    pub fn push_part(&mut self, part: PartRecord) -> crate::Result<()> {
        if self.completed {
            return Err(crate::Error::UploadSession(
                "session already completed".to_string(),
            ));
        }
        if part.part_number != self.next_part_number() {
            return Err(crate::Error::UploadSession(format!(
                "part number {} is not contiguous (expected {})",
                part.part_number,
                self.next_part_number()
            )));
        }
        let new_size = self.uploaded_size.saturating_add(part.size);
        if new_size > self.total_size {
            return Err(crate::Error::UploadSession(format!(
                "part of {} bytes would exceed declared size {}",
                part.size, self.total_size
            )));
        }
        self.uploaded_size = new_size;
        self.parts.push(part);
        Ok(())
    }
}

/// Identity key from which a session's upload ID is derived.
///
/// Two create requests with the same owner and filename address the same
/// session, which is what makes create retries resolve to a resume.
pub fn session_identity(owner_id: Option<&str>, filename: &str) -> String {
    format!(
        "{}:{}",
        owner_id.unwrap_or(crate::ANONYMOUS_OWNER),
        filename
    )
}

/// Storage key for a new session, namespaced by owner and creation date.
///
/// The date segment means the same identity created on a later day derives
/// a different key, which the session actor reports as a conflict rather
/// than a resume.
pub fn derive_storage_key(owner_id: Option<&str>, filename: &str, date: time::Date) -> String {
    format!(
        "{}/{:04}{:02}{:02}/{}",
        sanitize_key_segment(owner_id.unwrap_or(crate::ANONYMOUS_OWNER)),
        date.year(),
        u8::from(date.month()),
        date.day(),
        sanitize_key_segment(filename),
    )
}

/// Restrict a key segment to a safe character set.
///
/// Anything outside `[A-Za-z0-9._-]` is replaced with `_`, and leading dots
/// are stripped so a segment can never be `.` or `..`.
fn sanitize_key_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
