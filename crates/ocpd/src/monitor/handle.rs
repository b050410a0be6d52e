//! Caller-side view of a running session.

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{MonitorEvent, SessionState, SessionStatus};

/// Handle returned by [`PollingMonitor::start`](super::PollingMonitor::start).
///
/// Owns one subscription to the session's event stream. Further
/// subscriptions can be taken with [`subscribe`](Self::subscribe); each sees
/// events published after it was created.
///
/// # Usage
///
/// ```ignore
/// let mut session = monitor.start(MonitorOptions::default())?;
/// while let Some(event) = session.recv().await {
///     match event {
///         MonitorEvent::Snapshot(snapshot) => { /* ... */ }
///         MonitorEvent::Change(change) => { /* ... */ }
///         MonitorEvent::Stopped(summary) => { /* last event */ }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    events: broadcast::Receiver<MonitorEvent>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(super) fn new(
        id: u64,
        events: broadcast::Receiver<MonitorEvent>,
        status: watch::Receiver<SessionStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            events,
            status,
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The raw broadcast receiver.
    ///
    /// `recv()` on it returns `RecvError::Closed` once the session has ended.
    pub fn events(&mut self) -> &mut broadcast::Receiver<MonitorEvent> {
        &mut self.events
    }

    /// Next event, or `None` once the session has ended.
    ///
    /// A subscriber that falls behind skips the oldest events and logs how
    /// many were lost.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session_id = self.id, skipped, "Event subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// A new, independent receiver for the same session.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.resubscribe()
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch receiver for status updates.
    pub fn status_receiver(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Asks the session to stop without waiting for it.
    ///
    /// Use [`PollingMonitor::stop`](super::PollingMonitor::stop) for a
    /// bounded wait and a summary.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Waits until the session reports `Idle`.
    pub async fn wait_until_idle(&mut self) {
        let _ = self
            .status
            .wait_for(|s| s.state == SessionState::Idle)
            .await;
    }
}
