//! Upload session actor.
//!
//! One actor instance owns one upload's mutable state end-to-end. Every
//! operation on a session runs under the actor's async mutex (FIFO), so
//! mutations are strictly serialized and the offset check in
//! [`upload_part`](UploadActor::upload_part) is race-free without any
//! byte-level locking.
//!
//! State is hydrated lazily from the metadata store and persisted before an
//! operation acknowledges, so a restarted process sees pre-crash state.

use crate::error::UploadError;
use crate::metrics::{
    ACTIVE_UPLOAD_SESSIONS, BYTES_UPLOADED, COMPLETION_DURATION, COMPLETION_ROLLBACKS,
    OFFSET_CONFLICTS, PART_UPLOAD_DURATION, PARTS_UPLOADED, UPLOAD_SESSIONS_CANCELED,
    UPLOAD_SESSIONS_COMPLETED, UPLOAD_SESSIONS_CREATED, UPLOAD_SESSIONS_EXPIRED,
    UPLOAD_SESSIONS_RESUMED,
};
use crate::timer::SessionTimer;
use bytes::Bytes;
use parcel_core::config::AppConfig;
use parcel_core::upload::{PartRecord, UploadId, UploadSession};
use parcel_metadata::MetadataStore;
use parcel_metadata::models::{FileRecordRow, UploadPartRow, UploadSessionRow};
use parcel_storage::{BlobStore, CompletedPart};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Request to create or resume an upload session.
#[derive(Clone, Debug)]
pub struct CreateSessionRequest {
    /// Target key in the blob store, derived by the protocol adapter.
    pub storage_key: String,
    /// Declared final size in bytes.
    pub total_size: u64,
    /// Original filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Opaque client metadata.
    pub custom_metadata: BTreeMap<String, String>,
    /// Uploading principal, if known.
    pub owner_id: Option<String>,
}

/// Whether a create call opened a new session or resumed an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateAction {
    Created,
    Resumed,
}

/// Outcome of a create-or-resume call.
#[derive(Clone, Debug)]
pub struct CreateOutcome {
    pub action: CreateAction,
    pub uploaded_size: u64,
    pub expires_at: OffsetDateTime,
}

/// Snapshot of a session's progress.
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub upload_id: UploadId,
    pub uploaded_size: u64,
    pub total_size: u64,
    pub expires_at: OffsetDateTime,
    pub completed: bool,
}

/// Outcome of an append call.
#[derive(Clone, Copy, Debug)]
pub struct AppendOutcome {
    pub uploaded_size: u64,
    pub completed: bool,
}

struct ActorInner {
    /// Cached session state. `None` means absent once hydrated.
    session: Option<UploadSession>,
    /// Whether the metadata store has been consulted yet.
    hydrated: bool,
    /// Armed expiration timer, if any.
    timer: Option<SessionTimer>,
}

/// The sole authority over one upload's state.
pub struct UploadActor {
    id: UploadId,
    storage: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    config: Arc<AppConfig>,
    inner: Mutex<ActorInner>,
}

impl UploadActor {
    /// Create an actor for the given upload ID.
    pub fn new(
        id: UploadId,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        config: Arc<AppConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            storage,
            metadata,
            config,
            inner: Mutex::new(ActorInner {
                session: None,
                hydrated: false,
                timer: None,
            }),
        })
    }

    /// The upload ID this actor owns.
    pub fn id(&self) -> UploadId {
        self.id
    }

    /// Load session state from the metadata store on first use.
    async fn hydrate(self: &Arc<Self>, inner: &mut ActorInner) -> Result<(), UploadError> {
        if inner.hydrated {
            return Ok(());
        }

        let uuid = *self.id.as_uuid();
        if let Some(row) = self.metadata.get_session(uuid).await? {
            let parts = self.metadata.get_parts(uuid).await?;
            let session = row.into_session(parts)?;

            // A session restored from disk needs its timer rearmed; an
            // already-expired one will fire immediately and clean up.
            if !session.completed {
                inner.timer = Some(SessionTimer::arm(Arc::downgrade(self), session.expires_at));
            }
            inner.session = Some(session);
        }
        inner.hydrated = true;
        Ok(())
    }

    /// Force hydration. Used at startup to rearm timers for live sessions.
    pub async fn warm(self: &Arc<Self>) -> Result<(), UploadError> {
        let mut inner = self.inner.lock().await;
        self.hydrate(&mut inner).await
    }

    /// True once the actor is known to hold no session.
    pub async fn is_absent(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.hydrated && inner.session.is_none()
    }

    /// Create a new session or resume the existing one.
    pub async fn create_or_resume(
        self: &Arc<Self>,
        req: CreateSessionRequest,
    ) -> Result<CreateOutcome, UploadError> {
        let mut inner = self.inner.lock().await;
        self.hydrate(&mut inner).await?;

        if let Some(session) = inner.session.as_ref() {
            if !session.is_expired() {
                // The same identity targeting a different key is a new
                // upload colliding with a live session, not a resume.
                if session.storage_key != req.storage_key {
                    return Err(UploadError::Conflict);
                }

                UPLOAD_SESSIONS_RESUMED.inc();
                tracing::info!(
                    upload_id = %self.id,
                    uploaded_size = session.uploaded_size,
                    "Resumed upload session"
                );
                return Ok(CreateOutcome {
                    action: CreateAction::Resumed,
                    uploaded_size: session.uploaded_size,
                    expires_at: session.expires_at,
                });
            }

            // Expired session is abandoned: clean it up and create fresh.
            self.clear_expired(&mut inner).await;
        }

        let max = self.config.server.max_upload_size;
        if req.total_size > max {
            return Err(UploadError::TooLarge {
                size: req.total_size,
                max,
            });
        }

        let handle = self
            .storage
            .open_multipart(&req.storage_key, &req.content_type)
            .await?;

        let session = UploadSession::new(
            self.id,
            req.storage_key,
            handle,
            req.total_size,
            req.filename,
            req.content_type,
            req.custom_metadata,
            req.owner_id,
            self.config.server.session_ttl(),
        );

        let row = UploadSessionRow::from_session(&session)?;
        if let Err(e) = self.metadata.create_session(&row).await {
            // Don't leak the multipart handle if the session row cannot be
            // written.
            if let Err(abort_err) = self.storage.abort_multipart(&session.multipart).await {
                tracing::warn!(
                    upload_id = %self.id,
                    error = %abort_err,
                    "Failed to abort multipart upload after session create failure"
                );
            }
            return Err(e.into());
        }

        let expires_at = session.expires_at;
        inner.timer = Some(SessionTimer::arm(Arc::downgrade(self), expires_at));
        inner.session = Some(session);

        UPLOAD_SESSIONS_CREATED.inc();
        ACTIVE_UPLOAD_SESSIONS.inc();
        tracing::info!(
            upload_id = %self.id,
            total_size = req.total_size,
            "Created upload session"
        );

        Ok(CreateOutcome {
            action: CreateAction::Created,
            uploaded_size: 0,
            expires_at,
        })
    }

    /// Snapshot the session's progress. Read-only.
    pub async fn status(self: &Arc<Self>) -> Result<SessionStatus, UploadError> {
        let mut inner = self.inner.lock().await;
        self.hydrate(&mut inner).await?;

        match inner.session.as_ref() {
            // An expired, uncompleted session is already unknown to
            // callers; cleanup stays with the timer and the sweeper.
            Some(s) if !s.completed && s.is_expired() => Err(UploadError::NotFound),
            Some(s) => Ok(SessionStatus {
                upload_id: self.id,
                uploaded_size: s.uploaded_size,
                total_size: s.total_size,
                expires_at: s.expires_at,
                completed: s.completed,
            }),
            None => Err(UploadError::NotFound),
        }
    }

    /// Accept the next chunk at `offset`.
    ///
    /// The offset must equal the session's current uploaded size; anything
    /// else is rejected with the authoritative server offset. State only
    /// advances after the blob store confirms the part, and reaching the
    /// declared total runs the completion sequence within the same call.
    pub async fn upload_part(
        self: &Arc<Self>,
        offset: u64,
        data: Bytes,
    ) -> Result<AppendOutcome, UploadError> {
        let duration = PART_UPLOAD_DURATION.start_timer();
        let mut inner = self.inner.lock().await;
        self.hydrate(&mut inner).await?;

        if inner
            .session
            .as_ref()
            .is_some_and(|s| !s.completed && s.is_expired())
        {
            self.clear_expired(&mut inner).await;
        }

        enum Plan {
            CompletedNoop(AppendOutcome),
            Redrive,
            Append { part_number: u32, new_size: u64 },
        }

        let plan = {
            let session = inner.session.as_ref().ok_or(UploadError::NotFound)?;

            if session.completed {
                // Idempotent tail call: a client that missed the completion
                // response can safely repeat the last chunk.
                Plan::CompletedNoop(AppendOutcome {
                    uploaded_size: session.uploaded_size,
                    completed: true,
                })
            } else if session.is_full() && !session.parts.is_empty() {
                // Every byte is accepted but a previous completion attempt
                // failed. An append at the current offset re-drives it.
                if offset != session.uploaded_size {
                    OFFSET_CONFLICTS.inc();
                    return Err(UploadError::OffsetMismatch {
                        server_offset: session.uploaded_size,
                    });
                }
                Plan::Redrive
            } else {
                if offset != session.uploaded_size {
                    OFFSET_CONFLICTS.inc();
                    return Err(UploadError::OffsetMismatch {
                        server_offset: session.uploaded_size,
                    });
                }
                let chunk = data.len() as u64;
                let new_size = session.uploaded_size.saturating_add(chunk);
                if new_size > session.total_size {
                    return Err(UploadError::ChunkBeyondLength {
                        offset,
                        chunk,
                        total: session.total_size,
                    });
                }
                Plan::Append {
                    part_number: session.next_part_number(),
                    new_size,
                }
            }
        };

        match plan {
            Plan::CompletedNoop(outcome) => Ok(outcome),
            Plan::Redrive => {
                self.finish(&mut inner).await?;
                let session = self.session_ref(&inner)?;
                Ok(AppendOutcome {
                    uploaded_size: session.uploaded_size,
                    completed: session.completed,
                })
            }
            Plan::Append {
                part_number,
                new_size,
            } => {
                let chunk = data.len() as u64;
                let handle = self.session_ref(&inner)?.multipart.clone();

                // Upload first; only a confirmed part mutates state.
                let digest = self.storage.upload_part(&handle, part_number, data).await?;

                let part = PartRecord {
                    part_number,
                    etag: digest.0,
                    size: chunk,
                };
                let row = UploadPartRow::from_part(self.id, &part, OffsetDateTime::now_utc());
                self.metadata
                    .append_part(*self.id.as_uuid(), &row, new_size as i64)
                    .await?;

                {
                    let session = self.session_mut(&mut inner)?;
                    session
                        .push_part(part)
                        .map_err(|e| UploadError::Internal(e.to_string()))?;
                }
                PARTS_UPLOADED.inc();
                BYTES_UPLOADED.inc_by(chunk);

                let completed = if self.session_ref(&inner)?.is_full() {
                    self.finish(&mut inner).await?;
                    true
                } else {
                    false
                };

                duration.observe_duration();
                let session = self.session_ref(&inner)?;
                Ok(AppendOutcome {
                    uploaded_size: session.uploaded_size,
                    completed,
                })
            }
        }
    }

    /// Explicit cancellation. Idempotent from the caller's point of view.
    pub async fn cancel(self: &Arc<Self>) -> Result<(), UploadError> {
        let mut inner = self.inner.lock().await;
        self.hydrate(&mut inner).await?;

        let Some(session) = inner.session.take() else {
            return Ok(());
        };
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }

        if !session.completed {
            // Best-effort: an already-aborted or already-completed handle
            // is not an error.
            if let Err(e) = self.storage.abort_multipart(&session.multipart).await {
                tracing::warn!(
                    upload_id = %self.id,
                    error = %e,
                    "Failed to abort multipart upload during cancel"
                );
            }
            ACTIVE_UPLOAD_SESSIONS.dec();
        }

        if let Err(e) = self.metadata.delete_session(*self.id.as_uuid()).await {
            tracing::error!(
                upload_id = %self.id,
                error = %e,
                "Failed to delete session rows during cancel"
            );
        }

        UPLOAD_SESSIONS_CANCELED.inc();
        tracing::info!(upload_id = %self.id, "Canceled upload session");
        Ok(())
    }

    /// Timer/sweeper callback: clean up the session if its TTL has passed.
    ///
    /// A late or duplicate firing after completion or cancellation is a
    /// no-op.
    pub async fn expire(self: &Arc<Self>) -> Result<(), UploadError> {
        let mut inner = self.inner.lock().await;
        self.hydrate(&mut inner).await?;

        let due = match inner.session.as_ref() {
            None => false,
            Some(s) if s.completed => false,
            Some(s) => OffsetDateTime::now_utc() >= s.expires_at,
        };

        if due {
            self.clear_expired(&mut inner).await;
        }
        Ok(())
    }

    /// Abort the multipart upload (unless completed) and clear all state.
    async fn clear_expired(&self, inner: &mut ActorInner) {
        let Some(session) = inner.session.take() else {
            return;
        };
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }

        if !session.completed {
            if let Err(e) = self.storage.abort_multipart(&session.multipart).await {
                tracing::warn!(
                    upload_id = %self.id,
                    error = %e,
                    "Failed to abort multipart upload during expiration"
                );
            }
            ACTIVE_UPLOAD_SESSIONS.dec();
        }

        if let Err(e) = self.metadata.delete_session(*self.id.as_uuid()).await {
            tracing::error!(
                upload_id = %self.id,
                error = %e,
                "Failed to delete expired session rows"
            );
        }

        UPLOAD_SESSIONS_EXPIRED.inc();
        tracing::info!(upload_id = %self.id, "Expired upload session cleaned up");
    }

    /// Completion sequence: finalize the multipart upload, write the file
    /// record, and verify it landed.
    ///
    /// A blob-store failure leaves the session active and retryable. A
    /// verification failure deletes the orphaned object and reverts the
    /// completed flag so the caller can retry.
    async fn finish(self: &Arc<Self>, inner: &mut ActorInner) -> Result<(), UploadError> {
        let duration = COMPLETION_DURATION.start_timer();
        let uuid = *self.id.as_uuid();

        let (handle, parts, storage_key) = {
            let session = self.session_ref(inner)?;
            if session.parts.is_empty() {
                return Err(UploadError::EmptyCompletion);
            }
            (
                session.multipart.clone(),
                session
                    .parts
                    .iter()
                    .map(|p| CompletedPart {
                        part_number: p.part_number,
                        etag: p.etag.clone(),
                    })
                    .collect::<Vec<_>>(),
                session.storage_key.clone(),
            )
        };

        // Step 1: finalize at the blob store. On failure nothing changed;
        // the accepted parts are already persisted and the client retries.
        let digest = self.storage.complete_multipart(&handle, &parts).await?;

        // Step 2: mark completed before writing the file record.
        self.metadata.set_completed(uuid, true).await?;
        let record = {
            let session = self.session_mut(inner)?;
            session.completed = true;
            FileRecordRow {
                file_id: uuid,
                filename: session.filename.clone(),
                size_bytes: session.uploaded_size as i64,
                content_type: session.content_type.clone(),
                checksum: digest.0,
                storage_key: storage_key.clone(),
                owner_id: session.owner_id.clone(),
                custom_metadata: serde_json::to_string(&session.custom_metadata)
                    .unwrap_or_else(|_| "{}".to_string()),
                uploaded_at: OffsetDateTime::now_utc(),
            }
        };

        // Step 3: write the final record. AlreadyExists means a previous
        // completion attempt got this far; verification decides.
        let inserted = match self.metadata.insert_file(&record).await {
            Ok(()) => true,
            Err(parcel_metadata::MetadataError::AlreadyExists(_)) => true,
            Err(e) => {
                tracing::error!(upload_id = %self.id, error = %e, "File record insert failed");
                false
            }
        };

        // Step 4: verify by reading the record back.
        let verified = inserted
            && matches!(self.metadata.get_file(uuid).await, Ok(Some(_)));

        if !verified {
            COMPLETION_ROLLBACKS.inc();
            // Compensation: remove the orphaned object and reopen the
            // session so the client can retry.
            if let Err(e) = self.storage.delete(&storage_key).await {
                tracing::warn!(
                    upload_id = %self.id,
                    error = %e,
                    "Failed to delete orphaned object during completion rollback"
                );
            }
            if let Ok(session) = self.session_mut(inner) {
                session.completed = false;
            }
            if let Err(e) = self.metadata.set_completed(uuid, false).await {
                tracing::error!(
                    upload_id = %self.id,
                    error = %e,
                    "Failed to revert completed flag during rollback"
                );
            }
            return Err(UploadError::ConsistencyFailure);
        }

        // Step 5: verified. The session's ownership of further mutation
        // ends here; the retained row is reaped lazily by the sweeper.
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }
        UPLOAD_SESSIONS_COMPLETED.inc();
        ACTIVE_UPLOAD_SESSIONS.dec();
        duration.observe_duration();
        tracing::info!(
            upload_id = %self.id,
            size = record.size_bytes,
            "Upload completed and file record verified"
        );
        Ok(())
    }

    fn session_ref<'a>(&self, inner: &'a ActorInner) -> Result<&'a UploadSession, UploadError> {
        inner
            .session
            .as_ref()
            .ok_or_else(|| UploadError::Internal("session state vanished mid-operation".to_string()))
    }

    fn session_mut<'a>(
        &self,
        inner: &'a mut ActorInner,
    ) -> Result<&'a mut UploadSession, UploadError> {
        inner
            .session
            .as_mut()
            .ok_or_else(|| UploadError::Internal("session state vanished mid-operation".to_string()))
    }
}
