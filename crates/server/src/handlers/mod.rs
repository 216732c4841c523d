//! HTTP request handlers.

pub mod health;
pub mod uploads;

pub use health::health_check;
pub use uploads::{create_upload, delete_upload, head_upload, upload_chunk};
