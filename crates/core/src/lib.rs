//! Core domain types and shared logic for the Parcel file-sharing service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload identifiers and session lifecycle
//! - Part records and multipart handles
//! - The encoded upload-metadata codec
//! - Configuration types

pub mod config;
pub mod error;
pub mod metadata;
pub mod upload;

pub use error::{Error, Result};
pub use metadata::UploadMetadata;
pub use upload::{MultipartHandle, PartRecord, UploadId, UploadSession};

/// Default maximum declared upload size: 10 GiB.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Default maximum chunk size per append: 100 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Default upload session TTL: 24 hours.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;

/// Owner slot used when a create request carries no owner identity.
pub const ANONYMOUS_OWNER: &str = "anonymous";
