//! Upload actor registry and background session sweeper.
//!
//! The registry maps each upload ID to its single actor instance, so all
//! requests for one upload funnel through the same serialized handler.
//! It also runs the durable backstop for in-process timers: a periodic
//! sweep over persisted sessions whose TTL has passed.

use crate::actor::UploadActor;
use crate::error::UploadError;
use parcel_core::config::AppConfig;
use parcel_core::upload::UploadId;
use parcel_metadata::MetadataStore;
use parcel_storage::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Rows processed per sweep batch.
const SWEEP_BATCH_SIZE: u32 = 100;

/// Maximum sessions rearmed eagerly at startup. Anything beyond this is
/// still covered by lazy hydration on first access and by the sweeper.
const RECOVERY_LIMIT: u32 = 10_000;

/// Registry resolving upload IDs to their actor instances.
pub struct UploadRegistry {
    actors: Mutex<HashMap<UploadId, Arc<UploadActor>>>,
    storage: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    config: Arc<AppConfig>,
}

impl UploadRegistry {
    /// Create a new registry.
    pub fn new(
        config: Arc<AppConfig>,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            actors: Mutex::new(HashMap::new()),
            storage,
            metadata,
            config,
        })
    }

    /// Resolve an upload ID to its actor, creating it on first use.
    ///
    /// Deterministic: the same ID always maps to the same instance, which
    /// is what guarantees per-upload serialization.
    pub async fn resolve(&self, id: UploadId) -> Arc<UploadActor> {
        let mut actors = self.actors.lock().await;
        actors
            .entry(id)
            .or_insert_with(|| {
                UploadActor::new(
                    id,
                    self.storage.clone(),
                    self.metadata.clone(),
                    self.config.clone(),
                )
            })
            .clone()
    }

    /// Drop actors whose sessions no longer exist.
    pub async fn prune(&self) {
        // Snapshot first so the map lock is not held while waiting on each
        // actor's mutex.
        let snapshot: Vec<_> = {
            let actors = self.actors.lock().await;
            actors.iter().map(|(id, a)| (*id, a.clone())).collect()
        };

        let mut gone = Vec::new();
        for (id, actor) in snapshot {
            if actor.is_absent().await {
                gone.push(id);
            }
        }

        if !gone.is_empty() {
            let mut actors = self.actors.lock().await;
            for id in gone {
                actors.remove(&id);
            }
        }
    }

    /// Number of actors currently resident.
    pub async fn len(&self) -> usize {
        self.actors.lock().await.len()
    }

    /// True when no actors are resident.
    pub async fn is_empty(&self) -> bool {
        self.actors.lock().await.is_empty()
    }

    /// One sweep pass: expire overdue sessions and reap completed ones
    /// whose retention window has passed.
    pub async fn sweep(self: &Arc<Self>) -> Result<usize, UploadError> {
        let mut swept = 0;
        loop {
            let now = OffsetDateTime::now_utc();
            let rows = self
                .metadata
                .get_expired_sessions(now, SWEEP_BATCH_SIZE)
                .await?;
            if rows.is_empty() {
                break;
            }
            let batch_len = rows.len();
            let mut batch_swept = 0;

            for row in rows {
                if row.completed {
                    // Completed sessions are only retained for idempotent
                    // tail calls; past the TTL the rows can go.
                    if let Err(e) = self.metadata.delete_session(row.upload_id).await {
                        tracing::error!(
                            upload_id = %row.upload_id,
                            error = %e,
                            "Failed to reap completed session"
                        );
                        continue;
                    }
                } else {
                    let id = UploadId::parse(&row.upload_id.to_string())
                        .map_err(|e| UploadError::Internal(e.to_string()))?;
                    let actor = self.resolve(id).await;
                    if let Err(e) = actor.expire().await {
                        tracing::error!(
                            upload_id = %id,
                            error = %e,
                            "Failed to expire session during sweep"
                        );
                        continue;
                    }
                }
                batch_swept += 1;
            }
            swept += batch_swept;

            // A batch where nothing could be processed would refetch the
            // same rows forever; leave the stragglers to the next sweep.
            if batch_swept == 0 || batch_len < SWEEP_BATCH_SIZE as usize {
                break;
            }
        }

        self.prune().await;
        Ok(swept)
    }

    /// Startup recovery: clean up sessions that outlived their TTL while
    /// the process was down, and rearm timers for everything still live.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryStats, UploadError> {
        let expired = self.sweep().await?;

        let now = OffsetDateTime::now_utc();
        let rows = self
            .metadata
            .get_live_sessions(now, RECOVERY_LIMIT)
            .await?;
        if rows.len() as u32 == RECOVERY_LIMIT {
            tracing::warn!(
                limit = RECOVERY_LIMIT,
                "Recovery limit reached; remaining sessions rearm lazily on first access"
            );
        }

        let mut rearmed = 0;
        for row in &rows {
            let id = UploadId::parse(&row.upload_id.to_string())
                .map_err(|e| UploadError::Internal(e.to_string()))?;
            let actor = self.resolve(id).await;
            // Hydration arms the timer from the persisted expiry.
            actor.warm().await?;
            rearmed += 1;
        }

        Ok(RecoveryStats { expired, rearmed })
    }

    /// Spawn the background sweep loop.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.server.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match self.sweep().await {
                    Ok(0) => {}
                    Ok(swept) => {
                        tracing::info!(swept, "Session sweep cleaned up expired sessions");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Session sweep failed");
                    }
                }
            }
        })
    }
}

/// What startup recovery found.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryStats {
    /// Sessions cleaned up because their TTL passed while down.
    pub expired: usize,
    /// Live sessions whose timers were rearmed.
    pub rearmed: usize,
}
