//! Compaction monitor
//!
//! On every tick of its own timer the monitor reads each partition's size
//! and compacts those at or above the threshold. While a partition is being
//! compacted the compacting flag is set, the periodic flush ticker is
//! stopped and the flush gate is held, so no flush can touch any store
//! until compaction is over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tidepool_storage::{PartitionId, PartitionStore};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use crate::registry::PartitionPool;
use crate::status::EmitterMetrics;
use crate::ticker::Ticker;

/// When a partition is compacted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    pub threshold_bytes: u64,
}

impl CompactionPolicy {
    /// Threshold in MB of 1,000,000 bytes
    pub fn from_megabytes(megabytes: u64) -> Self {
        Self {
            threshold_bytes: megabytes.saturating_mul(1_000_000),
        }
    }

    /// Periodic check: compact at or above the threshold
    pub fn should_compact(&self, size: u64) -> bool {
        size >= self.threshold_bytes
    }

    /// Open-time check: compact only above the threshold
    pub fn should_compact_on_open(&self, size: u64) -> bool {
        size > self.threshold_bytes
    }
}

/// Partitions handled by one compaction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub compacted: Vec<PartitionId>,
    pub failed: Vec<(PartitionId, String)>,
    /// Partitions whose size could not be read
    pub skipped: Vec<PartitionId>,
}

/// Bounds partition size by triggering compaction
#[derive(Debug)]
pub struct CompactionMonitor {
    policy: CompactionPolicy,
    compacting: Arc<AtomicBool>,
    flush_ticker: Arc<Ticker>,
    flush_gate: Arc<AsyncMutex<()>>,
    metrics: Arc<EmitterMetrics>,
}

impl CompactionMonitor {
    pub fn new(
        policy: CompactionPolicy,
        compacting: Arc<AtomicBool>,
        flush_ticker: Arc<Ticker>,
        flush_gate: Arc<AsyncMutex<()>>,
        metrics: Arc<EmitterMetrics>,
    ) -> Self {
        Self {
            policy,
            compacting,
            flush_ticker,
            flush_gate,
            metrics,
        }
    }

    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }

    /// Run one size check over every partition
    #[instrument(skip_all, fields(threshold = self.policy.threshold_bytes))]
    pub async fn check(&self, pool: &PartitionPool) -> CompactionReport {
        let mut report = CompactionReport::default();

        for store in pool.iter() {
            let partition = store.partition().clone();
            let size = match store.size_on_disk() {
                Ok(size) => size,
                Err(e) => {
                    warn!(partition = %partition, error = %e, "Failed to read partition size");
                    report.skipped.push(partition);
                    continue;
                }
            };

            debug!(partition = %partition, size, "Checked partition size");
            if !self.policy.should_compact(size) {
                continue;
            }

            match self.compact_paused(store.clone()).await {
                Ok(()) => report.compacted.push(partition),
                Err(e) => report.failed.push((partition, e)),
            }
        }

        report
    }

    /// Compact partitions already above the threshold when opened
    ///
    /// Runs before any timer is started, so flushing needs no pausing.
    pub async fn compact_on_open(&self, pool: &PartitionPool) -> CompactionReport {
        let mut report = CompactionReport::default();

        for store in pool.iter() {
            let partition = store.partition().clone();
            match store.size_on_disk() {
                Ok(size) if self.policy.should_compact_on_open(size) => {
                    info!(partition = %partition, size, "Compacting on open");
                    match self.run_compaction(store.clone()).await {
                        Ok(()) => report.compacted.push(partition),
                        Err(e) => report.failed.push((partition, e)),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(partition = %partition, error = %e, "Failed to read partition size");
                    report.skipped.push(partition);
                }
            }
        }

        report
    }

    /// Compact with the flush path suspended
    async fn compact_paused(&self, store: Arc<dyn PartitionStore>) -> Result<(), String> {
        info!(partition = %store.partition(), "Compacting partition");

        self.compacting.store(true, Ordering::SeqCst);
        let was_running = self.flush_ticker.stop();

        let result = {
            let _gate = self.flush_gate.lock().await;
            self.run_compaction(store).await
        };

        // Always resume, even after a failure
        self.compacting.store(false, Ordering::SeqCst);
        if was_running {
            self.flush_ticker.start();
        }

        result
    }

    async fn run_compaction(&self, store: Arc<dyn PartitionStore>) -> Result<(), String> {
        let partition = store.partition().clone();
        let result = tokio::task::spawn_blocking(move || store.compact()).await;

        match result {
            Ok(Ok(compacted)) => {
                self.metrics.record_compaction();
                info!(partition = %partition, compacted, "Compaction completed");
                Ok(())
            }
            Ok(Err(e)) => {
                let message = format!("{partition}: compaction failed: {e}");
                error!(partition = %partition, error = %e, "Compaction failed");
                self.metrics.record_compaction_failure(message.clone());
                Err(message)
            }
            Err(e) => {
                let message = format!("{partition}: compaction task failed: {e}");
                error!(partition = %partition, error = %e, "Compaction task failed");
                self.metrics.record_compaction_failure(message.clone());
                Err(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tidepool_storage::{MemoryDatastore, Schema, Session};

    fn partition(name: &str) -> PartitionId {
        PartitionId::new(name).unwrap()
    }

    async fn setup() -> (CompactionMonitor, PartitionPool, MemoryDatastore, Arc<Ticker>) {
        let datastore = MemoryDatastore::new();
        let pool = PartitionPool::open(
            &datastore,
            &Session::anonymous(),
            &Schema::named("events"),
            &[partition("p1"), partition("p2")],
        )
        .await
        .unwrap();
        let ticker = Arc::new(Ticker::new("flush", Duration::from_secs(60), || {}));
        let monitor = CompactionMonitor::new(
            CompactionPolicy::from_megabytes(1),
            Arc::new(AtomicBool::new(false)),
            ticker.clone(),
            Arc::new(AsyncMutex::new(())),
            Arc::new(EmitterMetrics::new()),
        );
        (monitor, pool, datastore, ticker)
    }

    #[test]
    fn test_policy_thresholds() {
        let policy = CompactionPolicy::from_megabytes(100);
        assert_eq!(policy.threshold_bytes, 100_000_000);
        assert!(policy.should_compact(100_000_000));
        assert!(!policy.should_compact_on_open(100_000_000));
        assert!(policy.should_compact_on_open(100_000_001));
        assert!(!policy.should_compact(99_999_999));
    }

    #[tokio::test]
    async fn test_compacts_only_oversized_partitions() {
        let (monitor, pool, datastore, ticker) = setup().await;
        ticker.start();
        datastore.store(&partition("p2")).unwrap().set_size(2_000_000);

        let report = monitor.check(&pool).await;

        assert_eq!(report.compacted, vec![partition("p2")]);
        assert_eq!(datastore.store(&partition("p1")).unwrap().compactions(), 0);
        assert_eq!(datastore.store(&partition("p2")).unwrap().compactions(), 1);
        assert!(ticker.is_running());
        assert!(!monitor.compacting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_clears_flag_and_resumes_ticker() {
        let (monitor, pool, datastore, ticker) = setup().await;
        ticker.start();
        let store = datastore.store(&partition("p1")).unwrap();
        store.set_size(5_000_000);
        store.fail_compaction(true);

        let report = monitor.check(&pool).await;

        assert_eq!(report.failed.len(), 1);
        assert!(ticker.is_running());
        assert!(!monitor.compacting.load(Ordering::SeqCst));
        let status = monitor
            .metrics
            .snapshot(crate::status::PersistenceState::Ready, 0, false);
        assert_eq!(status.compaction_failures, 1);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_stopped_ticker_stays_stopped() {
        let (monitor, pool, datastore, ticker) = setup().await;
        datastore.store(&partition("p1")).unwrap().set_size(5_000_000);

        monitor.check(&pool).await;
        assert!(!ticker.is_running());
    }

    #[tokio::test]
    async fn test_compact_on_open_uses_strict_threshold() {
        let (monitor, pool, datastore, _ticker) = setup().await;
        datastore.store(&partition("p1")).unwrap().set_size(1_000_000);
        datastore.store(&partition("p2")).unwrap().set_size(1_000_001);

        let report = monitor.compact_on_open(&pool).await;
        assert_eq!(report.compacted, vec![partition("p2")]);
    }
}
