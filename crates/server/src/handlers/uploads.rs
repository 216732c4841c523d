//! Resumable upload protocol handlers.
//!
//! Stateless translation layer between the chunked-upload protocol's
//! header conventions and the session actor's operations. All storage
//! side effects are delegated to the actor.

use crate::actor::{CreateAction, CreateSessionRequest};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use parcel_core::UploadMetadata;
use parcel_core::upload::{UploadId, derive_storage_key, session_identity};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Declared total length of the upload.
pub const UPLOAD_LENGTH: &str = "upload-length";
/// Current byte offset of an append, and the server's offset in responses.
pub const UPLOAD_OFFSET: &str = "upload-offset";
/// Encoded key/value metadata block on create.
pub const UPLOAD_METADATA: &str = "upload-metadata";
/// Session expiry timestamp in responses.
pub const UPLOAD_EXPIRES: &str = "upload-expires";
/// Completion flag ("0"/"1") in responses.
pub const UPLOAD_COMPLETE: &str = "upload-complete";
/// Optional uploading principal supplied by the front proxy.
pub const OWNER_ID: &str = "x-owner-id";

/// Required content type on append requests.
pub const CHUNK_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Additional buffer for chunk reads beyond the max chunk size, covering
/// HTTP framing overhead. Oversized chunks are still rejected after read.
const CHUNK_UPLOAD_BUFFER: usize = 1024;

/// Read a header as a string, rejecting non-ASCII values.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("header {name} is not valid ASCII"))),
    }
}

/// Parse the declared total length from the create request.
fn parse_upload_length(headers: &HeaderMap) -> ApiResult<u64> {
    let raw = header_str(headers, UPLOAD_LENGTH)?
        .ok_or_else(|| ApiError::BadRequest(format!("missing {UPLOAD_LENGTH} header")))?;

    let length: u64 = raw.parse().map_err(|_| {
        ApiError::BadRequest(format!(
            "{UPLOAD_LENGTH} must be a non-negative integer, got {raw:?}"
        ))
    })?;

    // Lengths beyond i64 cannot be represented in the session row.
    if length > i64::MAX as u64 {
        return Err(ApiError::BadRequest(format!(
            "{UPLOAD_LENGTH} {length} exceeds maximum supported size {}",
            i64::MAX
        )));
    }

    Ok(length)
}

/// Parse the claimed current offset from an append request.
fn parse_upload_offset(headers: &HeaderMap) -> ApiResult<u64> {
    let raw = header_str(headers, UPLOAD_OFFSET)?
        .ok_or_else(|| ApiError::BadRequest(format!("missing {UPLOAD_OFFSET} header")))?;

    raw.parse().map_err(|_| {
        ApiError::BadRequest(format!(
            "{UPLOAD_OFFSET} must be a non-negative integer, got {raw:?}"
        ))
    })
}

/// Parse the optional owner identity header.
fn parse_owner_id(headers: &HeaderMap) -> ApiResult<Option<String>> {
    match header_str(headers, OWNER_ID)? {
        None => Ok(None),
        Some(owner) => {
            let owner = owner.trim();
            if owner.is_empty() {
                return Ok(None);
            }
            if owner.len() > 256 {
                return Err(ApiError::BadRequest(format!(
                    "{OWNER_ID} header too long"
                )));
            }
            Ok(Some(owner.to_string()))
        }
    }
}

/// Require the append content type.
fn require_chunk_content_type(headers: &HeaderMap) -> ApiResult<()> {
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str())?.unwrap_or_default();
    if content_type != CHUNK_CONTENT_TYPE {
        return Err(ApiError::UnsupportedMediaType(
            CHUNK_CONTENT_TYPE.to_string(),
        ));
    }
    Ok(())
}

fn format_expires(expires_at: OffsetDateTime) -> ApiResult<String> {
    expires_at
        .format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format expires_at: {e}")))
}

fn empty_response(builder: axum::http::response::Builder) -> ApiResult<Response> {
    builder
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

/// POST /v1/uploads - Create or resume a resumable upload.
#[tracing::instrument(skip(state, req), fields(upload_id))]
pub async fn create_upload(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let headers = req.headers();
    let total_size = parse_upload_length(headers)?;
    let metadata_header = header_str(headers, UPLOAD_METADATA)?
        .ok_or_else(|| ApiError::BadRequest(format!("missing {UPLOAD_METADATA} header")))?;
    let metadata = UploadMetadata::parse(metadata_header)?;
    let owner_id = parse_owner_id(headers)?;

    let identity = session_identity(owner_id.as_deref(), &metadata.filename);
    let upload_id = UploadId::derive(&identity);
    tracing::Span::current().record("upload_id", tracing::field::display(&upload_id));

    let storage_key = derive_storage_key(
        owner_id.as_deref(),
        &metadata.filename,
        OffsetDateTime::now_utc().date(),
    );

    let actor = state.uploads.resolve(upload_id).await;
    let outcome = actor
        .create_or_resume(CreateSessionRequest {
            storage_key,
            total_size,
            filename: metadata.filename,
            content_type: metadata.content_type,
            custom_metadata: metadata.extra,
            owner_id,
        })
        .await?;

    let status = match outcome.action {
        CreateAction::Created => StatusCode::CREATED,
        CreateAction::Resumed => StatusCode::OK,
    };

    empty_response(
        Response::builder()
            .status(status)
            .header(header::LOCATION, format!("/v1/uploads/{upload_id}"))
            .header(UPLOAD_OFFSET, outcome.uploaded_size.to_string())
            .header(UPLOAD_EXPIRES, format_expires(outcome.expires_at)?),
    )
}

/// PATCH /v1/uploads/{upload_id} - Append the next chunk.
#[tracing::instrument(skip(state, req), fields(upload_id = %upload_id))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let upload_id = UploadId::parse(&upload_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid upload ID: {e}")))?;

    let headers = req.headers();
    let offset = parse_upload_offset(headers)?;
    require_chunk_content_type(headers)?;

    let max_chunk = state.config.server.max_chunk_size as usize;
    let chunk = axum::body::to_bytes(req.into_body(), max_chunk + CHUNK_UPLOAD_BUFFER)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read chunk: {e}")))?;

    if chunk.len() > max_chunk {
        return Err(ApiError::PayloadTooLarge(format!(
            "chunk size {} exceeds maximum {max_chunk}",
            chunk.len()
        )));
    }

    let actor = state.uploads.resolve(upload_id).await;
    let outcome = actor.upload_part(offset, chunk).await?;

    empty_response(
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header(UPLOAD_OFFSET, outcome.uploaded_size.to_string())
            .header(UPLOAD_COMPLETE, if outcome.completed { "1" } else { "0" }),
    )
}

/// HEAD /v1/uploads/{upload_id} - Report upload progress.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn head_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Response> {
    let upload_id = UploadId::parse(&upload_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid upload ID: {e}")))?;

    let actor = state.uploads.resolve(upload_id).await;
    let status = actor.status().await?;

    empty_response(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CACHE_CONTROL, "no-store")
            .header(UPLOAD_OFFSET, status.uploaded_size.to_string())
            .header(UPLOAD_LENGTH, status.total_size.to_string())
            .header(UPLOAD_EXPIRES, format_expires(status.expires_at)?)
            .header(UPLOAD_COMPLETE, if status.completed { "1" } else { "0" }),
    )
}

/// DELETE /v1/uploads/{upload_id} - Cancel an upload.
///
/// Idempotent: canceling an unknown or already-canceled upload succeeds.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    let upload_id = UploadId::parse(&upload_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid upload ID: {e}")))?;

    let actor = state.uploads.resolve(upload_id).await;
    actor.cancel().await?;

    Ok(StatusCode::NO_CONTENT)
}
