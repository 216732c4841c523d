//! Blob storage abstraction and backends for Parcel.
//!
//! This crate provides:
//! - Classic multipart-upload primitives (open, upload numbered part,
//!   complete, abort) behind the [`BlobStore`] trait
//! - Object deletion for completion rollback
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{BlobStore, CompletedPart, CompletionDigest, PartDigest};

use parcel_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
