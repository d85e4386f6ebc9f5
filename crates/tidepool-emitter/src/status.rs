//! Observable emitter state
//!
//! Persistence failures never reach the caller of `emit`. They are logged
//! and counted here instead, so degraded operation shows up in
//! [`EmitterStatus`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Lifecycle of the persistence side channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum PersistenceState {
    /// Login and partition open still running; persistence is inert
    Initializing,
    /// Messages on registered topics are buffered and flushed
    Ready,
    /// Initialization failed; persistence stays inert
    Failed(String),
    /// The emitter was closed
    Closed,
}

impl PersistenceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PersistenceState::Ready)
    }
}

impl fmt::Display for PersistenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceState::Initializing => write!(f, "initializing"),
            PersistenceState::Ready => write!(f, "ready"),
            PersistenceState::Failed(reason) => write!(f, "failed: {reason}"),
            PersistenceState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of an emitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmitterStatus {
    pub state: PersistenceState,
    /// Messages currently waiting in the buffer
    pub buffered: usize,
    /// Messages ever accepted into the buffer
    pub messages_buffered: u64,
    /// Records written to partitions
    pub messages_persisted: u64,
    /// Messages lost to transform or write failures
    pub messages_dropped: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    /// Registered-topic messages not buffered because persistence was not ready
    pub skipped_inert: u64,
    pub compactions: u64,
    pub compaction_failures: u64,
    /// Flushes that found a non-empty buffer
    pub flushes: u64,
    pub last_error: Option<String>,
    pub compacting: bool,
}

/// Counters behind [`EmitterStatus`]
#[derive(Debug, Default)]
pub struct EmitterMetrics {
    messages_buffered: AtomicU64,
    messages_persisted: AtomicU64,
    messages_dropped: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    skipped_inert: AtomicU64,
    compactions: AtomicU64,
    compaction_failures: AtomicU64,
    flushes: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl EmitterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_buffered(&self) {
        self.messages_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_inert(&self) {
        self.skipped_inert.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_written(&self, records: usize) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.messages_persisted
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self, dropped: usize, error: impl Into<String>) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.messages_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        self.record_error(error);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction_failure(&self, error: impl Into<String>) {
        self.compaction_failures.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    /// Remember the most recent failure
    pub fn record_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    /// Snapshot the counters
    pub fn snapshot(
        &self,
        state: PersistenceState,
        buffered: usize,
        compacting: bool,
    ) -> EmitterStatus {
        EmitterStatus {
            state,
            buffered,
            messages_buffered: self.messages_buffered.load(Ordering::Relaxed),
            messages_persisted: self.messages_persisted.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            skipped_inert: self.skipped_inert.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            compaction_failures: self.compaction_failures.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            compacting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_counters() {
        let metrics = EmitterMetrics::new();
        metrics.record_batch_written(3);
        metrics.record_batch_written(2);
        metrics.record_batch_failed(4, "disk full");

        let status = metrics.snapshot(PersistenceState::Ready, 0, false);
        assert_eq!(status.batches_written, 2);
        assert_eq!(status.messages_persisted, 5);
        assert_eq!(status.batches_failed, 1);
        assert_eq!(status.messages_dropped, 4);
        assert_eq!(status.last_error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PersistenceState::Ready.to_string(), "ready");
        assert_eq!(
            PersistenceState::Failed("login refused".to_string()).to_string(),
            "failed: login refused"
        );
        assert!(!PersistenceState::Initializing.is_ready());
    }

    #[test]
    fn test_status_serializes() {
        let status = EmitterMetrics::new().snapshot(
            PersistenceState::Failed("boom".to_string()),
            2,
            true,
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"]["state"], "failed");
        assert_eq!(json["state"]["reason"], "boom");
        assert_eq!(json["buffered"], 2);
        assert_eq!(json["compacting"], true);
    }
}
