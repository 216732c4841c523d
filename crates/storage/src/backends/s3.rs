//! S3-compatible blob store using the AWS SDK.
//!
//! Maps the multipart primitives directly onto S3's multipart-upload API.
//! Works against AWS S3 and S3-compatible services (MinIO, R2) via the
//! optional endpoint and path-style settings.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, CompletedPart, CompletionDigest, PartDigest};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use bytes::Bytes;
use parcel_core::upload::MultipartHandle;
use tracing::instrument;

/// S3-compatible blob store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

/// Map an SDK operation error to a storage error.
fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// When explicit credentials are not provided, the SDK's default
    /// credential chain (env vars, profiles, IAM roles) is used.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bucket: impl Into<String>,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        // Apply credentials: explicit config or ambient AWS credential chain
        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id,
                secret,
                None, // session token
                None, // expiration
                "parcel-config",
            );
            builder = builder.credentials_provider(credentials);
        } else {
            let chain = DefaultCredentialsChain::builder()
                .region(aws_config::Region::new(resolved_region))
                .build()
                .await;
            builder = builder.credentials_provider(chain);
        }

        if let Some(endpoint) = &endpoint {
            // Handle bare host:port endpoints (e.g., "minio:9000") by
            // prepending http://
            let lower = endpoint.to_lowercase();
            let endpoint_url = if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("http://{endpoint}")
            };
            builder = builder.endpoint_url(endpoint_url);
        }

        if force_path_style {
            builder = builder.force_path_style(true);
        }

        // Strip trailing slashes to avoid double-slash keys like "prefix//key"
        let prefix = prefix.map(|p| p.trim_end_matches('/').to_string());

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.into(),
            prefix,
        })
    }

    /// Apply the configured key prefix.
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Check whether an object exists.
    async fn exists(&self, full_key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_not_found())
                {
                    Ok(false)
                } else {
                    Err(map_s3_operation_error(err))
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn open_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<MultipartHandle> {
        let full_key = self.full_key(key);

        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        Ok(MultipartHandle {
            key: key.to_string(),
            id: upload_id,
        })
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
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

        let full_key = self.full_key(&handle.key);
        let upload_output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&full_key)
            .upload_id(&handle.id)
            .part_number(part_number as i32)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(PartDigest(
            upload_output.e_tag().unwrap_or_default().to_string(),
        ))
    }

    #[instrument(skip(self, parts), fields(backend = "s3", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> StorageResult<CompletionDigest> {
        if parts.is_empty() {
            return Err(StorageError::InvalidPart(
                "completion requires at least one part".to_string(),
            ));
        }

        let completed_parts: Vec<aws_sdk_s3::types::CompletedPart> = parts
            .iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part.part_number as i32)
                    .build()
            })
            .collect();

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let full_key = self.full_key(&handle.key);
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .upload_id(&handle.id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(CompletionDigest(
            output.e_tag().unwrap_or_default().to_string(),
        ))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn abort_multipart(&self, handle: &MultipartHandle) -> StorageResult<()> {
        let full_key = self.full_key(&handle.key);
        match self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .upload_id(&handle.id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                // An already-finished handle is not an error: abort is
                // best-effort cleanup and must be idempotent.
                if err.as_service_error().and_then(|e| e.meta().code()) == Some("NoSuchUpload") {
                    Ok(())
                } else {
                    Err(map_s3_operation_error(err))
                }
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);

        // S3 delete_object doesn't error on missing keys by default, so we
        // do a head check first to return NotFound if needed.
        if !self.exists(&full_key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }
}
