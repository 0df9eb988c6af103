//! Single-session coordination.
//!
//! At most one editing session is active process-wide. Opening while a
//! different session is active is a conflict; closing the active session
//! hands a delayed shutdown request back to the caller, which the lifecycle
//! supervisor acts on only if no new session has opened in the meantime.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_CLOSE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// A second session tried to open while another was active.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Session already exists")]
pub struct SessionConflict;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// No session id was supplied.
    MissingId,
    /// The id does not match the active session; nothing changed.
    Ignored,
    /// The active session ended. The process should exit after
    /// `shutdown_after` unless a new session opens first.
    Closed { shutdown_after: Duration },
}

#[derive(Debug)]
pub struct SessionCoordinator {
    active: Mutex<Option<String>>,
    debounce: Duration,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSE_DEBOUNCE)
    }
}

impl SessionCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            active: Mutex::new(None),
            debounce,
        }
    }

    /// Open a session, or refresh the one identified by `requested`.
    ///
    /// A fresh id is minted on every success, so a late close from a
    /// replaced page is treated as stale.
    pub async fn open_session(&self, requested: Option<&str>) -> Result<String, SessionConflict> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_deref() {
            if requested != Some(current) {
                info!(active = %current, "rejecting concurrent session");
                return Err(SessionConflict);
            }
            debug!(previous = %current, "session refreshed");
        }

        let id = uuid::Uuid::new_v4().to_string();
        *active = Some(id.clone());
        info!(session_id = %id, "session opened");
        Ok(id)
    }

    /// Close the session identified by `id`.
    pub async fn close_session(&self, id: Option<&str>) -> CloseOutcome {
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return CloseOutcome::MissingId;
        };

        let mut active = self.active.lock().await;
        if active.as_deref() != Some(id) {
            info!(session_id = %id, "ignoring close-session for inactive session");
            return CloseOutcome::Ignored;
        }

        *active = None;
        info!(session_id = %id, "session closed");
        CloseOutcome::Closed {
            shutdown_after: self.debounce,
        }
    }

    /// Drop `id` without scheduling shutdown, if it is still the active one.
    pub async fn release(&self, id: &str) {
        let mut active = self.active.lock().await;
        if active.as_deref() == Some(id) {
            *active = None;
            debug!(session_id = %id, "session released");
        }
    }

    pub async fn active_session(&self) -> Option<String> {
        self.active.lock().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }
}
