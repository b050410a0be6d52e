//! The session task: tick, build, diff, publish.

use std::sync::Arc;

use chrono::Utc;
use ocp_core::{diff, StatusSnapshot};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MonitorEvent, MonitorOptions, SessionState, SessionStatus, SessionSummary, StopReason};
use crate::builder::{BuildError, SnapshotBuilder};
use crate::discovery::CapabilityCache;

/// Everything a session task owns.
///
/// The task holds the only event sender, so the stream closes when it exits.
pub(super) struct SessionContext {
    pub id: u64,
    pub options: MonitorOptions,
    pub builder: Arc<SnapshotBuilder>,
    pub capabilities: Arc<CapabilityCache>,
    pub events: broadcast::Sender<MonitorEvent>,
    pub status: watch::Sender<SessionStatus>,
    pub cancel: CancellationToken,
}

/// Resolves at `deadline`, or never when there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub(super) async fn run(ctx: SessionContext) -> SessionSummary {
    let SessionContext {
        id,
        options,
        builder,
        capabilities,
        events,
        status,
        cancel,
    } = ctx;

    let started_at = Utc::now();
    let deadline = options.max_duration.map(|d| Instant::now() + d);
    let mut tick = interval(options.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut previous: Option<Arc<StatusSnapshot>> = None;
    let mut progress = SessionStatus {
        state: SessionState::Running,
        ..Default::default()
    };

    let reason = loop {
        if progress.iterations >= options.max_iterations {
            break StopReason::MaxIterations;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break StopReason::Requested,
            _ = until(deadline) => break StopReason::MaxDuration,
            _ = tick.tick() => {}
        }

        let caps = tokio::select! {
            biased;

            _ = cancel.cancelled() => break StopReason::Requested,
            caps = capabilities.get() => caps,
        };

        let sequence = progress.iterations + 1;
        let snapshot = match builder.build_cycle(&caps, sequence, &cancel).await {
            Ok(snapshot) => snapshot,
            Err(BuildError::Cancelled) => break StopReason::Requested,
            Err(BuildError::DeviceUnavailable(reason)) => {
                warn!(session_id = id, sequence, reason = %reason, "Device unavailable, emitting degraded snapshot");
                progress.degraded_cycles += 1;
                StatusSnapshot::degraded(sequence, Utc::now())
            }
        };
        progress.iterations = sequence;

        let snapshot = Arc::new(snapshot);
        let _ = events.send(MonitorEvent::Snapshot(Arc::clone(&snapshot)));

        // The first cycle is the baseline.
        if let Some(prev) = previous.as_deref() {
            let changes = diff(prev, &snapshot);
            if !changes.is_empty() {
                debug!(session_id = id, sequence, changes = changes.len(), "Status changed");
            }
            if prev.health != snapshot.health {
                info!(
                    session_id = id,
                    sequence,
                    healthy = snapshot.health.is_healthy(),
                    health = ?snapshot.health,
                    "Device health changed"
                );
            }
            for change in changes {
                progress.change_events += 1;
                let _ = events.send(MonitorEvent::Change(change));
            }
        }
        previous = Some(snapshot);

        status.send_replace(progress.clone());
    };

    progress.state = SessionState::Stopping;
    status.send_replace(progress.clone());

    let summary = SessionSummary {
        session_id: id,
        reason,
        iterations: progress.iterations,
        degraded_cycles: progress.degraded_cycles,
        change_events: progress.change_events,
        started_at,
        ended_at: Utc::now(),
    };

    info!(
        session_id = id,
        reason = ?reason,
        iterations = summary.iterations,
        degraded_cycles = summary.degraded_cycles,
        change_events = summary.change_events,
        "Monitoring session ended"
    );

    let _ = events.send(MonitorEvent::Stopped(summary.clone()));
    progress.state = SessionState::Idle;
    status.send_replace(progress);

    summary
}
