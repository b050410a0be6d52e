//! Polling monitor - periodic snapshots and change events for one device.
//!
//! A [`PollingMonitor`] owns at most one session at a time. A session is a
//! tokio task that builds a snapshot every interval, diffs it against the
//! previous one and publishes the results over a broadcast channel.
//!
//! ```text
//!   Idle ──start()──▶ Running ──stop() / bound reached──▶ Stopping ──▶ Idle
//! ```
//!
//! # Cancellation
//!
//! Stopping is cooperative. The session checks its token between reads and
//! at every wait point, but never interrupts a read in flight; each read is
//! bounded by its own ceiling. `stop()` waits at most `stop_timeout` and then
//! aborts the task, reporting [`MonitorError::ForcedAbandon`].
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures (no subscribers) are ignored, never fatal

mod handle;
mod session;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ocp_core::{ChangeEvent, StatusSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builder::SnapshotBuilder;
use crate::discovery::CapabilityCache;

pub use handle::SessionHandle;

// ============================================================================
// Constants
// ============================================================================

/// Shortest accepted polling interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Longest accepted polling interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Default iteration bound for a session (one day at 1 Hz).
pub const DEFAULT_MAX_ITERATIONS: u64 = 86_400;

/// Capacity of the per-session event channel.
pub const EVENT_BUFFER: usize = 1024;

// ============================================================================
// Options
// ============================================================================

/// Parameters of one monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorOptions {
    pub interval: Duration,
    /// The session stops by itself after this many cycles.
    pub max_iterations: u64,
    /// The session stops by itself once this much time has passed.
    pub max_duration: Option<Duration>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_duration: None,
        }
    }
}

impl MonitorOptions {
    /// Clamps the interval to [`MIN_INTERVAL`]..=[`MAX_INTERVAL`] and raises
    /// a zero iteration bound to one.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            interval: self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL),
            max_iterations: self.max_iterations.max(1),
            max_duration: self.max_duration,
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Live progress of a session, published over a `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Completed cycles, degraded ones included.
    pub iterations: u64,
    pub degraded_cycles: u64,
    pub change_events: u64,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    MaxIterations,
    MaxDuration,
}

/// Final account of a session that exited on its own terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: u64,
    pub reason: StopReason,
    pub iterations: u64,
    pub degraded_cycles: u64,
    pub change_events: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Items on a session's event stream.
///
/// The stream ends (the channel closes) right after `Stopped`.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A new snapshot, in sequence order.
    Snapshot(Arc<StatusSnapshot>),
    /// One field differs from the previous snapshot.
    Change(ChangeEvent),
    /// The session has ended.
    Stopped(SessionSummary),
}

// ============================================================================
// Error Types
// ============================================================================

/// Control-plane errors surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// `start` while a session runs, or `stop` while none does
    #[error("session conflict: monitor is {0}")]
    SessionConflict(SessionState),

    /// The session ignored cancellation and was aborted
    #[error("session did not stop within {timeout_ms} ms and was abandoned")]
    ForcedAbandon { timeout_ms: u64 },

    /// The session task panicked or was cancelled by the runtime
    #[error("session task failed: {0}")]
    TaskFailed(String),
}

// ============================================================================
// Polling Monitor
// ============================================================================

/// How long `stop` waits for an aborted task to be torn down.
const ABORT_GRACE: Duration = Duration::from_millis(100);

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
    /// Taken by `stop` while it waits; `None` means a stop is in progress.
    join: Option<JoinHandle<SessionSummary>>,
    status: watch::Receiver<SessionStatus>,
}

impl ActiveSession {
    fn is_stopping(&self) -> bool {
        self.join.is_none()
    }

    /// Running, or stopping under a pending `stop`.
    fn is_live(&self) -> bool {
        self.join.as_ref().map_or(true, |join| !join.is_finished())
    }

    fn current_status(&self) -> SessionStatus {
        let mut status = self.status.borrow().clone();
        if self.is_stopping() {
            status.state = SessionState::Stopping;
        }
        status
    }
}

/// Runs at most one monitoring session over a shared builder.
///
/// The session slot is guarded by a plain mutex that is never held across an
/// await, so state queries never make `start` fail.
pub struct PollingMonitor {
    builder: Arc<SnapshotBuilder>,
    capabilities: Arc<CapabilityCache>,
    stop_timeout: Duration,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
}

impl PollingMonitor {
    pub fn new(
        builder: Arc<SnapshotBuilder>,
        capabilities: Arc<CapabilityCache>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            builder,
            capabilities,
            stop_timeout,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts a session and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `MonitorError::SessionConflict` if a session is running or stopping.
    pub fn start(&self, options: MonitorOptions) -> Result<SessionHandle, MonitorError> {
        let mut active = self.slot();

        if let Some(current) = active.as_ref().filter(|s| s.is_live()) {
            return Err(MonitorError::SessionConflict(current.current_status().state));
        }

        let options = options.normalized();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = broadcast::channel(EVENT_BUFFER);
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            state: SessionState::Running,
            ..Default::default()
        });

        let context = session::SessionContext {
            id,
            options,
            builder: Arc::clone(&self.builder),
            capabilities: Arc::clone(&self.capabilities),
            events: event_tx,
            status: status_tx,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(session::run(context));

        info!(
            session_id = id,
            interval_ms = options.interval.as_millis() as u64,
            max_iterations = options.max_iterations,
            max_duration = ?options.max_duration,
            "Monitoring session started"
        );

        *active = Some(ActiveSession {
            id,
            cancel: cancel.clone(),
            join: Some(join),
            status: status_rx.clone(),
        });

        Ok(SessionHandle::new(id, event_rx, status_rx, cancel))
    }

    /// Stops the running session, waiting at most the stop timeout.
    ///
    /// # Errors
    ///
    /// - `MonitorError::SessionConflict` if no session is running, or another
    ///   stop is already in progress
    /// - `MonitorError::ForcedAbandon` if the task had to be aborted
    /// - `MonitorError::TaskFailed` if the task panicked
    pub async fn stop(&self) -> Result<SessionSummary, MonitorError> {
        let (id, mut join) = {
            let mut active = self.slot();
            let Some(session) = active.as_mut() else {
                return Err(MonitorError::SessionConflict(SessionState::Idle));
            };
            let Some(join) = session.join.take() else {
                return Err(MonitorError::SessionConflict(SessionState::Stopping));
            };
            if join.is_finished() {
                debug!(session_id = session.id, "Stop requested after session ended");
                *active = None;
                return Err(MonitorError::SessionConflict(SessionState::Idle));
            }
            session.cancel.cancel();
            (session.id, join)
        };

        // Frees the slot however this future ends, including being dropped.
        let _release = ReleaseSlot { monitor: self, id };

        match tokio::time::timeout(self.stop_timeout, &mut join).await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => {
                warn!(session_id = id, error = %e, "Session task failed");
                Err(MonitorError::TaskFailed(e.to_string()))
            }
            Err(_) => {
                join.abort();
                // Let the runtime drop the task so its in-flight reads are
                // quarantined before we report back.
                let _ = tokio::time::timeout(ABORT_GRACE, &mut join).await;
                warn!(
                    session_id = id,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Session did not stop in time, abandoning"
                );
                Err(MonitorError::ForcedAbandon {
                    timeout_ms: self.stop_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.status().map(|s| s.state).unwrap_or_default()
    }

    /// Latest status of the current session, if one is running or stopping.
    pub fn status(&self) -> Option<SessionStatus> {
        self.slot()
            .as_ref()
            .filter(|s| s.is_live())
            .map(ActiveSession::current_status)
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}

/// Clears the session slot when a `stop` call finishes.
struct ReleaseSlot<'a> {
    monitor: &'a PollingMonitor,
    id: u64,
}

impl Drop for ReleaseSlot<'_> {
    fn drop(&mut self) {
        let mut active = self.monitor.slot();
        if active.as_ref().is_some_and(|s| s.id == self.id) {
            *active = None;
        }
    }
}

impl Drop for PollingMonitor {
    fn drop(&mut self) {
        let active = match self.active.get_mut() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(session) = active {
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::CapabilityDiscoverer;
    use crate::reader::BoundedReader;
    use ocp_core::{Catalog, DeviceRoot};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicBool;
    use std::task::Poll;
    use tempfile::TempDir;

    fn monitor(dir: &TempDir) -> PollingMonitor {
        let reader = BoundedReader::new(
            DeviceRoot::new(dir.path()),
            Arc::new(Catalog::ptp_ocp()),
            Duration::from_millis(200),
        );
        PollingMonitor::new(
            Arc::new(SnapshotBuilder::new(reader.clone())),
            Arc::new(CapabilityCache::new(CapabilityDiscoverer::new(reader))),
            Duration::from_secs(2),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_is_not_blocked_by_status_queries() {
        let dir = TempDir::new().unwrap();
        let monitor = Arc::new(monitor(&dir));
        let done = Arc::new(AtomicBool::new(false));

        let poller = {
            let monitor = Arc::clone(&monitor);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let _ = monitor.status();
                    let _ = monitor.state();
                }
            })
        };

        for _ in 0..20 {
            let options = MonitorOptions {
                interval: MIN_INTERVAL,
                ..Default::default()
            };
            let session = monitor.start(options).unwrap();
            assert_eq!(monitor.state(), SessionState::Running);
            let summary = monitor.stop().await.unwrap();
            assert_eq!(summary.session_id, session.id());
            assert_eq!(monitor.state(), SessionState::Idle);
        }

        done.store(true, Ordering::Relaxed);
        poller.join().unwrap();
    }

    #[tokio::test]
    async fn test_stop_in_progress_is_reported_as_stopping() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        let _session = monitor.start(MonitorOptions::default()).unwrap();

        let first = monitor.stop();
        tokio::pin!(first);
        // Poll once so the first stop claims the session.
        assert!(poll_once(first.as_mut()).await.is_none());

        assert_eq!(monitor.state(), SessionState::Stopping);
        assert_eq!(
            monitor.start(MonitorOptions::default()).unwrap_err(),
            MonitorError::SessionConflict(SessionState::Stopping)
        );
        assert_eq!(
            monitor.stop().await.unwrap_err(),
            MonitorError::SessionConflict(SessionState::Stopping)
        );

        let summary = first.await.unwrap();
        assert_eq!(summary.reason, StopReason::Requested);
        assert_eq!(monitor.state(), SessionState::Idle);
    }

    /// Polls `fut` exactly once, returning its output if it was ready.
    async fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| {
            Poll::Ready(match Pin::new(&mut fut).poll(cx) {
                Poll::Ready(out) => Some(out),
                Poll::Pending => None,
            })
        })
        .await
    }

    #[test]
    fn test_normalized_clamps_interval() {
        let fast = MonitorOptions {
            interval: Duration::from_millis(1),
            ..Default::default()
        };
        assert_eq!(fast.normalized().interval, MIN_INTERVAL);

        let slow = MonitorOptions {
            interval: Duration::from_secs(7200),
            ..Default::default()
        };
        assert_eq!(slow.normalized().interval, MAX_INTERVAL);
    }

    #[test]
    fn test_zero_iterations_becomes_one() {
        let options = MonitorOptions {
            max_iterations: 0,
            ..Default::default()
        };
        assert_eq!(options.normalized().max_iterations, 1);
    }

    #[test]
    fn test_defaults() {
        let options = MonitorOptions::default();
        assert_eq!(options.interval, Duration::from_secs(1));
        assert_eq!(options.max_iterations, 86_400);
        assert_eq!(options.max_duration, None);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Running.to_string(), "running");
        let err = MonitorError::SessionConflict(SessionState::Running);
        assert_eq!(err.to_string(), "session conflict: monitor is running");
    }
}
