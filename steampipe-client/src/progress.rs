//! Progress reporting contract for downloads.
//!
//! Workers push byte and file increments through [`ProgressReporter`];
//! interactive front-ends poll the shared counters on a timer instead of
//! redrawing per update.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sink for download progress. Implementations must be cheap; workers call
/// these from hot paths.
pub trait ProgressReporter: Send + Sync {
    /// Record `bytes` more bytes handled (downloaded or verified-skipped).
    fn update(&self, bytes: u64);

    /// Record one more file completed.
    fn file_completed(&self);

    /// Called once when the operation finishes.
    fn close(&self) {}

    /// Whether cancellation was requested; workers stop issuing new fetches.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Reporter that discards all updates, for non-interactive runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn update(&self, _bytes: u64) {}
    fn file_completed(&self) {}
}

/// Shared monotonic counters plus a cancellation flag.
///
/// Clones share state; hand one to each worker and poll another from the
/// reporting loop.
#[derive(Clone, Default)]
pub struct ProgressCounters {
    bytes: Arc<AtomicU64>,
    files: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes handled so far.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Total files completed so far.
    pub fn files(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    /// Request cancellation: no new chunk fetches are issued, in-flight work
    /// finishes or aborts, partial files stay on disk.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl ProgressReporter for ProgressCounters {
    fn update(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn file_completed(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        ProgressCounters::is_cancelled(self)
    }
}
