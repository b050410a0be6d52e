//! Bounded attribute reads.
//!
//! Device attributes are backed by driver callbacks that can block
//! indefinitely (a wedged FPGA, a hung bus transaction). Every read, probe
//! and write therefore runs on a detached OS thread and the caller waits on
//! it under `tokio::time::timeout`. When the ceiling expires the caller gets
//! `TimedOut` immediately and the thread is left behind; its eventual result
//! is discarded.
//!
//! A path with an abandoned operation still in flight is quarantined: further
//! operations on it return `TimedOut` at once without spawning another
//! thread, so one stuck attribute never accumulates threads.
//!
//! # Async Safety
//!
//! Blocking filesystem calls never run on a runtime worker. Detached threads
//! (rather than `spawn_blocking`) are used so that a stuck read cannot hold
//! up runtime shutdown.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned locks are recovered with `into_inner`
//! - Thread spawn failures are reported as outcomes, never propagated as panics

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ocp_core::{
    AttributeName, AttributePath, AttributeReadResult, Catalog, DeviceRoot, ProbeOutcome,
    ReadOutcome, ResolveError,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

// ============================================================================
// Constants
// ============================================================================

/// Default per-operation ceiling.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Smallest accepted ceiling.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Largest accepted ceiling.
pub const MAX_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads are capped at this many bytes; longer values are truncated.
pub const MAX_READ_BYTES: u64 = 10 * 1024;

/// Clamps a requested ceiling into the accepted range.
#[must_use]
pub fn clamp_ceiling(ceiling: Duration) -> Duration {
    ceiling.clamp(MIN_READ_TIMEOUT, MAX_READ_TIMEOUT)
}

// ============================================================================
// Quarantine
// ============================================================================

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Paths with abandoned operations still in flight.
///
/// Each entry counts the stuck threads for its path. The entry is removed
/// once every abandoned thread for that path has returned.
#[derive(Debug, Clone, Default)]
pub struct Quarantine {
    inner: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl Quarantine {
    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, usize>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether an abandoned operation on `path` is still running.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    /// Number of quarantined paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Called by the waiter when its ceiling expires.
    ///
    /// Returns false if the operation finished in the meantime, in which
    /// case its result is ready and nothing is quarantined.
    fn abandon(&self, path: &Path, state: &AtomicU8) -> bool {
        let mut map = self.lock();
        let abandoned = state
            .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if abandoned {
            *map.entry(path.to_path_buf()).or_insert(0) += 1;
        }
        abandoned
    }

    /// Called by the worker thread once its operation returns.
    fn finish(&self, path: &Path, state: &AtomicU8) {
        let mut map = self.lock();
        let completed_in_time = state
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if completed_in_time {
            return;
        }

        let remaining = match map.get_mut(path) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            map.remove(path);
            debug!(path = %path.display(), "Stuck attribute released from quarantine");
        }
    }
}

// ============================================================================
// Bounded Execution
// ============================================================================

/// Why a bounded operation produced no result.
#[derive(Debug)]
pub(crate) enum Unfinished {
    /// The ceiling expired, or the path was already quarantined.
    TimedOut,
    /// No worker thread could be started.
    Spawn(io::Error),
}

/// Quarantines the path if the waiting future goes away before the worker
/// reports back, e.g. when an outer timeout or an aborted task drops it.
struct AbandonOnDrop<'a> {
    quarantine: &'a Quarantine,
    path: &'a Path,
    state: &'a AtomicU8,
    armed: bool,
}

impl AbandonOnDrop<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.quarantine.abandon(self.path, self.state) {
            warn!(
                path = %self.path.display(),
                "Attribute operation dropped while in flight, quarantining path"
            );
        }
    }
}

/// Runs `op` against `path` on a detached thread, waiting at most `ceiling`.
///
/// Dropping the returned future before it resolves counts as giving up on
/// the operation: the path is quarantined until the thread returns.
pub(crate) async fn run_bounded<T, F>(
    quarantine: &Quarantine,
    ceiling: Duration,
    path: &Path,
    op: F,
) -> Result<T, Unfinished>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> T + Send + 'static,
{
    if quarantine.contains(path) {
        debug!(path = %path.display(), "Skipping quarantined attribute");
        return Err(Unfinished::TimedOut);
    }

    let (tx, mut rx) = oneshot::channel();
    let state = Arc::new(AtomicU8::new(RUNNING));

    let worker_state = Arc::clone(&state);
    let worker_quarantine = quarantine.clone();
    let worker_path = path.to_path_buf();

    std::thread::Builder::new()
        .name("ocp-attr-io".to_string())
        .spawn(move || {
            let result = op(&worker_path);
            worker_quarantine.finish(&worker_path, &worker_state);
            // The receiver is gone when the waiter gave up.
            let _ = tx.send(result);
        })
        .map_err(Unfinished::Spawn)?;

    let mut guard = AbandonOnDrop {
        quarantine,
        path,
        state: &state,
        armed: true,
    };

    let waited = tokio::time::timeout(ceiling, &mut rx).await;
    guard.disarm();
    match waited {
        Ok(Ok(result)) => Ok(result),
        // Worker dropped the sender without sending; only possible if `op` panicked.
        Ok(Err(_)) => Err(Unfinished::TimedOut),
        Err(_) => {
            if quarantine.abandon(path, &state) {
                warn!(
                    path = %path.display(),
                    ceiling_ms = ceiling.as_millis() as u64,
                    "Attribute operation timed out, quarantining path"
                );
                Err(Unfinished::TimedOut)
            } else {
                // The worker marked itself finished and is about to send.
                rx.await.map_err(|_| Unfinished::TimedOut)
            }
        }
    }
}

fn io_outcome(err: &io::Error) -> ReadOutcome {
    match err.kind() {
        io::ErrorKind::NotFound => ReadOutcome::NotFound,
        io::ErrorKind::PermissionDenied => ReadOutcome::PermissionDenied,
        _ => ReadOutcome::ReadError(err.to_string()),
    }
}

/// Blocking read of one leaf. Runs on a worker thread.
fn read_blocking(path: &Path) -> ReadOutcome {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return io_outcome(&e),
    };

    let mut buf = Vec::new();
    if let Err(e) = file.take(MAX_READ_BYTES + 1).read_to_end(&mut buf) {
        return io_outcome(&e);
    }

    let truncated = buf.len() as u64 > MAX_READ_BYTES;
    if truncated {
        warn!(
            path = %path.display(),
            limit_bytes = MAX_READ_BYTES,
            "Attribute value exceeds read limit, truncating"
        );
        buf.truncate(MAX_READ_BYTES as usize);
    }

    let text = match String::from_utf8(buf) {
        Ok(text) => text,
        // Truncation may split a multi-byte character at the very end.
        Err(e) if truncated && e.utf8_error().error_len().is_none() => {
            let valid = e.utf8_error().valid_up_to();
            let mut bytes = e.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).unwrap_or_default()
        }
        Err(_) => return ReadOutcome::ReadError("content is not valid UTF-8".to_string()),
    };

    ReadOutcome::Value(text.trim().to_string())
}

/// Blocking existence check. Never reads content.
fn probe_blocking(path: &Path) -> ProbeOutcome {
    match fs::metadata(path) {
        Ok(_) => ProbeOutcome::Present,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => ProbeOutcome::PermissionDenied,
        Err(_) => ProbeOutcome::Absent,
    }
}

/// Blocking write of one leaf. The leaf must already exist.
fn write_blocking(path: &Path, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value.as_bytes())?;
    file.flush()
}

/// One entry of a bounded directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Listed {
    pub name: String,
    pub path: PathBuf,
    /// Regular file, after following symlinks.
    pub is_file: bool,
}

/// Blocking directory listing, sorted by name. Non-UTF-8 names are skipped.
pub(crate) fn list_blocking(path: &Path) -> io::Result<Vec<Listed>> {
    let mut entries: Vec<Listed> = fs::read_dir(path)?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let path = entry.path();
            let is_file = fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
            Some(Listed {
                name,
                path,
                is_file,
            })
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

// ============================================================================
// Bounded Reader
// ============================================================================

/// Reads attributes of one device under a hard per-operation ceiling.
///
/// Cheap to clone; clones share the quarantine.
#[derive(Debug, Clone)]
pub struct BoundedReader {
    root: DeviceRoot,
    catalog: Arc<Catalog>,
    ceiling: Duration,
    quarantine: Quarantine,
}

impl BoundedReader {
    /// Creates a reader for `root`. The ceiling is clamped to
    /// [`MIN_READ_TIMEOUT`]..=[`MAX_READ_TIMEOUT`].
    pub fn new(root: DeviceRoot, catalog: Arc<Catalog>, ceiling: Duration) -> Self {
        Self {
            root,
            catalog,
            ceiling: clamp_ceiling(ceiling),
            quarantine: Quarantine::default(),
        }
    }

    pub fn root(&self) -> &DeviceRoot {
        &self.root
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Number of paths currently quarantined behind a stuck operation.
    #[must_use]
    pub fn stalled_count(&self) -> usize {
        self.quarantine.len()
    }

    /// Reads a catalogued attribute.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError` if the name does not map to a leaf under the
    /// device root. Device failures are reported in the outcome instead.
    pub async fn read(&self, name: &AttributeName) -> Result<AttributeReadResult, ResolveError> {
        let path = self.root.resolve(name, &self.catalog)?;
        Ok(self.read_path(path).await)
    }

    /// Parses a logical name (`clock_source`, `generator[2].duty`) and reads it.
    pub async fn read_str(&self, name: &str) -> Result<AttributeReadResult, ResolveError> {
        let path = self.root.resolve_str(name, &self.catalog)?;
        Ok(self.read_path(path).await)
    }

    /// Reads a raw leaf relative to the device root.
    pub async fn read_leaf(&self, leaf: &str) -> Result<AttributeReadResult, ResolveError> {
        let path = AttributePath::raw(&self.root, leaf)?;
        Ok(self.read_path(path).await)
    }

    /// Reads an already resolved location.
    pub async fn read_path(&self, path: AttributePath) -> AttributeReadResult {
        let started = Instant::now();
        let outcome = match run_bounded(&self.quarantine, self.ceiling, &path.path, read_blocking)
            .await
        {
            Ok(outcome) => outcome,
            Err(Unfinished::TimedOut) => ReadOutcome::TimedOut,
            Err(Unfinished::Spawn(e)) => {
                warn!(error = %e, "Failed to start attribute reader thread");
                ReadOutcome::ReadError(format!("reader thread unavailable: {e}"))
            }
        };

        if !matches!(outcome, ReadOutcome::Value(_)) {
            debug!(attribute = %path, outcome = outcome.label(), "Attribute not read");
        }

        AttributeReadResult {
            path,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    /// Checks whether a leaf relative to the device root exists.
    pub async fn probe_leaf(&self, leaf: &str) -> Result<ProbeOutcome, ResolveError> {
        let path = self.root.resolve_leaf(leaf)?;
        Ok(self.probe_path(&path).await)
    }

    /// Checks whether a location exists, bounded by the same ceiling as reads.
    pub async fn probe_path(&self, path: &Path) -> ProbeOutcome {
        match run_bounded(&self.quarantine, self.ceiling, path, probe_blocking).await {
            Ok(outcome) => outcome,
            Err(Unfinished::TimedOut) => ProbeOutcome::TimedOut,
            Err(Unfinished::Spawn(e)) => {
                warn!(error = %e, "Failed to start probe thread");
                ProbeOutcome::TimedOut
            }
        }
    }

    /// Name of the device a symlink leaf points at, e.g. `ptp` to `ptp3`.
    ///
    /// `None` when the link is absent, unreadable or stuck.
    pub async fn link_name(&self, leaf: &str) -> Result<Option<String>, ResolveError> {
        let path = self.root.resolve_leaf(leaf)?;
        let target =
            match run_bounded(&self.quarantine, self.ceiling, &path, |p: &Path| fs::read_link(p))
                .await
            {
                Ok(Ok(target)) => target,
                Ok(Err(e)) => {
                    if e.kind() != io::ErrorKind::NotFound {
                        debug!(path = %path.display(), error = %e, "Link not readable");
                    }
                    return Ok(None);
                }
                Err(Unfinished::TimedOut) => return Ok(None),
                Err(Unfinished::Spawn(e)) => {
                    warn!(error = %e, "Failed to start link reader thread");
                    return Ok(None);
                }
            };
        Ok(target
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string))
    }

    /// Names of the regular files directly inside a directory leaf, sorted.
    ///
    /// Empty when the directory is absent, unreadable or stuck.
    pub async fn list_files(&self, leaf: &str) -> Result<Vec<String>, ResolveError> {
        let path = self.root.resolve_leaf(leaf)?;
        let entries = match run_bounded(&self.quarantine, self.ceiling, &path, list_blocking).await
        {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                debug!(path = %path.display(), error = %e, "Directory not listed");
                return Ok(Vec::new());
            }
            Err(Unfinished::TimedOut) => return Ok(Vec::new()),
            Err(Unfinished::Spawn(e)) => {
                warn!(error = %e, "Failed to start listing thread");
                return Ok(Vec::new());
            }
        };
        Ok(entries
            .into_iter()
            .filter(|entry| entry.is_file)
            .map(|entry| entry.name)
            .collect())
    }

    /// Writes `value` to an existing location under the same ceiling.
    pub(crate) async fn write_path(
        &self,
        path: &AttributePath,
        value: String,
    ) -> Result<io::Result<()>, Unfinished> {
        run_bounded(&self.quarantine, self.ceiling, &path.path, move |p| {
            write_blocking(p, &value)
        })
        .await
    }
}
