//! Process lifecycle supervision.
//!
//! Request handlers never exit the process themselves. They send a
//! [`ShutdownRequest`] through a [`ShutdownHandle`]; the [`Supervisor`]
//! owns the decision and resolves once the process should wind down.

use crate::session::SessionCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The editing session closed and no new one replaced it.
    SessionClosed,
    /// The public tunnel closed and the process was configured to follow it.
    TunnelClosed,
    /// The operator interrupted the process.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRequest {
    /// Shut down after `delay` unless a session is active by then.
    AfterSessionClose { delay: Duration },
    /// Shut down immediately.
    Now(ShutdownReason),
}

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<ShutdownRequest>,
}

impl ShutdownHandle {
    pub fn session_closed(&self, delay: Duration) {
        self.send(ShutdownRequest::AfterSessionClose { delay });
    }

    pub fn shutdown_now(&self, reason: ShutdownReason) {
        self.send(ShutdownRequest::Now(reason));
    }

    fn send(&self, request: ShutdownRequest) {
        // Only fails once the supervisor has already decided to stop.
        let _ = self.tx.send(request);
    }
}

pub struct Supervisor {
    rx: mpsc::UnboundedReceiver<ShutdownRequest>,
    // Keeps `rx` open even if every handle is dropped.
    _tx: mpsc::UnboundedSender<ShutdownRequest>,
    coordinator: Arc<SessionCoordinator>,
}

/// Create a supervisor bound to `coordinator` and a handle that feeds it.
pub fn channel(coordinator: Arc<SessionCoordinator>) -> (ShutdownHandle, Supervisor) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ShutdownHandle { tx: tx.clone() };
    let supervisor = Supervisor {
        rx,
        _tx: tx,
        coordinator,
    };
    (handle, supervisor)
}

impl Supervisor {
    /// Wait until the process should stop and report why.
    pub async fn run(mut self) -> ShutdownReason {
        let mut pending: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                Some(request) = self.rx.recv() => match request {
                    ShutdownRequest::AfterSessionClose { delay } => {
                        pending.spawn(tokio::time::sleep(delay));
                    }
                    ShutdownRequest::Now(reason) => {
                        info!(?reason, "shutdown requested");
                        return reason;
                    }
                },
                Some(_) = pending.join_next(), if !pending.is_empty() => {
                    if self.coordinator.is_active().await {
                        info!("ignoring close-session, a new session opened (page refresh)");
                    } else {
                        info!("editing session closed, shutting down");
                        return ShutdownReason::SessionClosed;
                    }
                }
            }
        }
    }
}
