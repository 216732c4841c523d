//! Local filesystem blob store.
//!
//! Multipart uploads are staged as numbered part files under
//! `.multipart/<handle-id>/`. Completion concatenates the parts in order
//! into the final key path and removes the staging directory; abort just
//! removes the staging directory.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, CompletedPart, CompletionDigest, PartDigest};
use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::upload::MultipartHandle;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Directory under the storage root holding in-flight multipart uploads.
const MULTIPART_DIR: &str = ".multipart";

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Returns an error if the key would escape the storage root.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key cannot be empty".to_string()));
        }
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        // Validate all path components are normal (no .., ., root, etc.)
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }

        Ok(self.root.join(key))
    }

    /// Staging directory for a multipart handle.
    fn staging_dir(&self, handle_id: &str) -> StorageResult<PathBuf> {
        // Handle IDs are generated as UUIDs; reject anything else so a
        // corrupted handle can never address outside the staging area.
        if Uuid::parse_str(handle_id).is_err() {
            return Err(StorageError::MultipartNotFound(handle_id.to_string()));
        }
        Ok(self.root.join(MULTIPART_DIR).join(handle_id))
    }

    /// Path of one numbered part file inside a staging directory.
    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("{part_number:05}.part"))
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Concatenate verified parts into `tmp`, returning the running hash.
    async fn assemble(
        dir: &Path,
        parts: &[CompletedPart],
        tmp: &Path,
    ) -> StorageResult<Sha256> {
        let mut out = fs::File::create(tmp).await?;
        let mut hasher = Sha256::new();

        for part in parts {
            let path = Self::part_path(dir, part.part_number);
            let data = fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::InvalidPart(format!("part {} is missing", part.part_number))
                } else {
                    StorageError::Io(e)
                }
            })?;

            let digest = sha256_hex(&data);
            if digest != part.etag {
                return Err(StorageError::InvalidPart(format!(
                    "part {} digest mismatch: expected {}, got {digest}",
                    part.part_number, part.etag
                )));
            }

            hasher.update(&data);
            out.write_all(&data).await?;
        }

        out.sync_all().await?;
        Ok(hasher)
    }

    /// Write a file atomically via a temp file in the same directory.
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        Self::ensure_parent(path).await?;
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open_multipart(
        &self,
        key: &str,
        _content_type: &str,
    ) -> StorageResult<MultipartHandle> {
        // Validate the target key up front so completion cannot fail on a
        // bad key after parts have been accepted.
        self.key_path(key)?;

        let id = Uuid::new_v4().to_string();
        let dir = self.staging_dir(&id)?;
        fs::create_dir_all(&dir).await?;

        Ok(MultipartHandle {
            key: key.to_string(),
            id,
        })
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn upload_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<PartDigest> {
        if part_number == 0 {
            return Err(StorageError::InvalidPart(
                "part numbers are 1-based".to_string(),
            ));
        }

        let dir = self.staging_dir(&handle.id)?;
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::MultipartNotFound(handle.id.clone()));
        }

        let path = Self::part_path(&dir, part_number);
        Self::write_atomic(&path, &data).await?;

        Ok(PartDigest(sha256_hex(&data)))
    }

    #[instrument(skip(self, parts), fields(backend = "filesystem", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> StorageResult<CompletionDigest> {
        let dir = self.staging_dir(&handle.id)?;
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::MultipartNotFound(handle.id.clone()));
        }
        if parts.is_empty() {
            return Err(StorageError::InvalidPart(
                "completion requires at least one part".to_string(),
            ));
        }

        let final_path = self.key_path(&handle.key)?;
        Self::ensure_parent(&final_path).await?;

        // Assemble into a temp file first so a crash mid-concatenation
        // never leaves a partial object at the final key.
        let tmp = final_path.with_extension("assembling");
        let result = Self::assemble(&dir, parts, &tmp).await;
        let hasher = match result {
            Ok(hasher) => hasher,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        };

        fs::rename(&tmp, &final_path).await?;
        fs::remove_dir_all(&dir).await?;

        Ok(CompletionDigest(format!("{:x}", hasher.finalize())))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn abort_multipart(&self, handle: &MultipartHandle) -> StorageResult<()> {
        let dir = self.staging_dir(&handle.id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            // Already aborted or already completed: not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
