//! Shared fixtures for server tests.
#![allow(dead_code)]

use crate::common::mocks::{MockBlobStore, MockMetadataStore};
use axum::Router;
use parcel_core::config::{AppConfig, MetadataConfig, StorageConfig};
use parcel_core::upload::{UploadId, derive_storage_key, session_identity};
use parcel_metadata::MetadataStore;
use parcel_server::actor::CreateSessionRequest;
use parcel_server::registry::UploadRegistry;
use parcel_server::{AppState, create_router};
use parcel_storage::BlobStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Actor-level test environment backed by mock stores.
pub struct TestEnv {
    pub registry: Arc<UploadRegistry>,
    pub storage: Arc<MockBlobStore>,
    pub metadata: Arc<MockMetadataStore>,
    pub config: Arc<AppConfig>,
}

/// Build a mock environment, letting the caller tweak the config.
pub fn mock_env(mutate: impl FnOnce(&mut AppConfig)) -> TestEnv {
    let mut config = AppConfig::for_testing();
    config.server.session_ttl_secs = 3600;
    mutate(&mut config);

    let config = Arc::new(config);
    let storage = MockBlobStore::new();
    let metadata = MockMetadataStore::new();
    let registry = UploadRegistry::new(
        config.clone(),
        storage.clone() as Arc<dyn BlobStore>,
        metadata.clone() as Arc<dyn MetadataStore>,
    );

    TestEnv {
        registry,
        storage,
        metadata,
        config,
    }
}

/// Build a create request the way the protocol adapter would.
pub fn create_request(
    owner: Option<&str>,
    filename: &str,
    total_size: u64,
) -> CreateSessionRequest {
    CreateSessionRequest {
        storage_key: derive_storage_key(owner, filename, OffsetDateTime::now_utc().date()),
        total_size,
        filename: filename.to_string(),
        content_type: "application/octet-stream".to_string(),
        custom_metadata: BTreeMap::new(),
        owner_id: owner.map(str::to_string),
    }
}

/// The upload ID the protocol adapter derives for an identity.
pub fn upload_id_for(owner: Option<&str>, filename: &str) -> UploadId {
    UploadId::derive(&session_identity(owner, filename))
}

/// Full application wired against real filesystem + SQLite stores.
pub async fn test_app() -> (tempfile::TempDir, AppState, Router) {
    let temp = tempfile::tempdir().unwrap();

    let mut config = AppConfig::for_testing();
    config.storage = StorageConfig::Filesystem {
        path: temp.path().join("storage"),
    };
    config.metadata = MetadataConfig::Sqlite {
        path: temp.path().join("metadata.db"),
    };

    let storage = parcel_storage::from_config(&config.storage).await.unwrap();
    let metadata = parcel_metadata::from_config(&config.metadata)
        .await
        .unwrap();
    metadata.migrate().await.unwrap();

    let state = AppState::new(config, storage, metadata);
    let router = create_router(state.clone());
    (temp, state, router)
}
