//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::upload::MultipartHandle;

/// Content digest ("etag") returned by the blob store for one uploaded part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartDigest(pub String);

impl PartDigest {
    /// Get the digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Digest covering the completed object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionDigest(pub String);

impl CompletionDigest {
    /// Get the digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ordered part reference submitted at completion.
#[derive(Clone, Debug)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// Digest returned when the part was uploaded.
    pub etag: String,
}

/// Blob store abstraction over classic multipart-upload semantics.
///
/// Every mutating call is driven by exactly one upload session actor; the
/// handle returned by [`open_multipart`](BlobStore::open_multipart) is never
/// shared across sessions.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Open a multipart upload targeting `key`.
    async fn open_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<MultipartHandle>;

    /// Upload one numbered part under an open handle.
    ///
    /// Part numbers are 1-based. The returned digest must be echoed back
    /// in [`complete_multipart`](BlobStore::complete_multipart).
    async fn upload_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<PartDigest>;

    /// Finalize a multipart upload from its ordered part list.
    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> StorageResult<CompletionDigest>;

    /// Abort a multipart upload and discard its staged parts.
    ///
    /// Aborting an already-aborted or already-completed handle is not an
    /// error.
    async fn abort_multipart(&self, handle: &MultipartHandle) -> StorageResult<()>;

    /// Delete a stored object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type
    /// (e.g., "s3", "filesystem"). Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup to ensure the storage is available
    /// before accepting requests. The default implementation returns Ok(()),
    /// suitable for backends that don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
