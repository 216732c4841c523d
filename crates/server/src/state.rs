//! Application state shared across handlers.

use crate::registry::UploadRegistry;
use parcel_core::config::AppConfig;
use parcel_metadata::MetadataStore;
use parcel_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob storage backend.
    pub storage: Arc<dyn BlobStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload actor registry.
    pub uploads: Arc<UploadRegistry>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Panics
    ///
    /// Panics if the server configuration is invalid.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        if let Err(error) = config.server.validate() {
            panic!("Invalid server configuration: {error}");
        }

        let config = Arc::new(config);
        let uploads = UploadRegistry::new(config.clone(), storage.clone(), metadata.clone());

        Self {
            config,
            storage,
            metadata,
            uploads,
        }
    }
}
