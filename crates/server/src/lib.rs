//! Parcel server library.
//!
//! Wires the upload session actor, its registry and timers, and the HTTP
//! protocol adapter into an axum application.

pub mod actor;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod state;
pub mod timer;

pub use error::{ApiError, ApiResult, UploadError};
pub use registry::UploadRegistry;
pub use routes::create_router;
pub use state::AppState;
