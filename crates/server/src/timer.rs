//! Single-shot session expiration timers.
//!
//! Each active session arms exactly one timer for its `expires_at`. The
//! timer fires the actor's expiration path once; completion cancels it. A
//! firing that races with cancellation is harmless because the actor
//! re-checks session state before acting.

use crate::actor::UploadActor;
use std::sync::Weak;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Handle for one armed expiration timer.
pub struct SessionTimer {
    handle: JoinHandle<()>,
}

impl SessionTimer {
    /// Arm a timer that drives the actor's expiration at `expires_at`.
    ///
    /// Holds only a weak reference: a dropped actor silently disarms the
    /// timer.
    pub fn arm(actor: Weak<UploadActor>, expires_at: OffsetDateTime) -> Self {
        let handle = tokio::spawn(async move {
            let delay = expires_at - OffsetDateTime::now_utc();
            if delay.is_positive() {
                let delay = std::time::Duration::try_from(delay).unwrap_or_default();
                tokio::time::sleep(delay).await;
            }

            if let Some(actor) = actor.upgrade()
                && let Err(e) = actor.expire().await
            {
                tracing::warn!(upload_id = %actor.id(), error = %e, "Session expiration failed");
            }
        });

        Self { handle }
    }

    /// Cancel the timer. Safe to call after the timer has already fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
