//! Actor and API error types.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::HeaderName};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Header carrying the authoritative server offset on conflicts.
pub const UPLOAD_OFFSET_HEADER: &str = "upload-offset";

/// Errors produced by the upload session actor.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload session not found")]
    NotFound,

    #[error("declared length {size} exceeds maximum {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("offset mismatch: server offset is {server_offset}")]
    OffsetMismatch { server_offset: u64 },

    #[error("an upload with this identity already targets a different storage key")]
    Conflict,

    #[error("chunk of {chunk} bytes at offset {offset} exceeds declared length {total}")]
    ChunkBeyondLength { offset: u64, chunk: u64, total: u64 },

    #[error("completion requires at least one uploaded part")]
    EmptyCompletion,

    #[error("file record verification failed; completion rolled back")]
    ConsistencyFailure,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] parcel_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] parcel_metadata::MetadataError),
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unsupported media type: expected {0}")]
    UnsupportedMediaType(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("offset mismatch: server offset is {server_offset}")]
    OffsetMismatch { server_offset: u64 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] parcel_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] parcel_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] parcel_core::Error),
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NotFound => Self::NotFound("upload session not found".to_string()),
            UploadError::TooLarge { .. } => Self::PayloadTooLarge(err.to_string()),
            UploadError::OffsetMismatch { server_offset } => Self::OffsetMismatch { server_offset },
            UploadError::Conflict => Self::Conflict(err.to_string()),
            UploadError::ChunkBeyondLength { .. } => Self::BadRequest(err.to_string()),
            UploadError::EmptyCompletion
            | UploadError::ConsistencyFailure
            | UploadError::Internal(_) => Self::Internal(err.to_string()),
            UploadError::Storage(e) => Self::Storage(e),
            UploadError::Metadata(e) => Self::Metadata(e),
        }
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::Conflict(_) => "conflict",
            Self::OffsetMismatch { .. } => "offset_mismatch",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::OffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                parcel_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                parcel_storage::StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                parcel_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                parcel_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        let mut response = (status, Json(body)).into_response();

        // A conflicting append gets the authoritative offset in a header so
        // the client knows exactly where to resume.
        if let Self::OffsetMismatch { server_offset } = self
            && let Ok(value) = HeaderValue::from_str(&server_offset.to_string())
        {
            response
                .headers_mut()
                .insert(HeaderName::from_static(UPLOAD_OFFSET_HEADER), value);
        }

        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
