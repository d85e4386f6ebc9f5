//! Bulk writer
//!
//! Turns a drained buffer snapshot into one batch write per partition.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tidepool_storage::{PartitionId, Record};
use tracing::{debug, error, warn};

use crate::buffer::BufferedMessage;
use crate::registry::{PartitionPool, TopicRegistry};
use crate::status::EmitterMetrics;

/// Result of writing one partition's batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PartitionOutcome {
    Written {
        partition: PartitionId,
        records: usize,
    },
    Failed {
        partition: PartitionId,
        dropped: usize,
        error: String,
    },
}

impl PartitionOutcome {
    pub fn partition(&self) -> &PartitionId {
        match self {
            PartitionOutcome::Written { partition, .. } => partition,
            PartitionOutcome::Failed { partition, .. } => partition,
        }
    }
}

/// Outcome of one flush, per partition that had messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub partitions: Vec<PartitionOutcome>,
}

impl FlushReport {
    /// Whether nothing was flushed
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Records written across all partitions
    pub fn records_written(&self) -> usize {
        self.partitions
            .iter()
            .map(|o| match o {
                PartitionOutcome::Written { records, .. } => *records,
                PartitionOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    /// Messages dropped across all partitions
    pub fn records_dropped(&self) -> usize {
        self.partitions
            .iter()
            .map(|o| match o {
                PartitionOutcome::Failed { dropped, .. } => *dropped,
                PartitionOutcome::Written { .. } => 0,
            })
            .sum()
    }

    /// Outcome for a partition
    pub fn outcome(&self, partition: &PartitionId) -> Option<&PartitionOutcome> {
        self.partitions.iter().find(|o| o.partition() == partition)
    }
}

/// Stateless batch writer
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkWriter;

impl BulkWriter {
    /// Transform and write a snapshot
    ///
    /// Messages are grouped by partition in arrival order. A transform or
    /// write failure drops that partition's batch only, and so does a panic
    /// inside a transform or store. Partitions without messages are not
    /// written.
    pub fn write(
        pool: &PartitionPool,
        registry: &TopicRegistry,
        snapshot: Vec<BufferedMessage>,
        metrics: &EmitterMetrics,
    ) -> FlushReport {
        let mut groups: HashMap<&PartitionId, Vec<BufferedMessage>> = HashMap::new();
        for buffered in snapshot {
            match registry.route(&buffered.message.topic) {
                Some(route) => groups.entry(&route.partition).or_default().push(buffered),
                None => {
                    warn!(topic = %buffered.message.topic, "Dropping message on unregistered topic")
                }
            }
        }

        let mut report = FlushReport::default();
        for partition in registry.partitions() {
            let Some(batch) = groups.remove(partition) else {
                continue;
            };
            let dropped = batch.len();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                Self::write_partition(pool, registry, partition, batch)
            }))
            .unwrap_or_else(|payload| PartitionOutcome::Failed {
                partition: partition.clone(),
                dropped,
                error: format!("panicked: {}", panic_message(payload.as_ref())),
            });
            match &outcome {
                PartitionOutcome::Written { records, .. } => {
                    metrics.record_batch_written(*records);
                }
                PartitionOutcome::Failed { dropped, error, .. } => {
                    error!(partition = %partition, dropped, error = %error, "Batch dropped");
                    metrics.record_batch_failed(*dropped, format!("{partition}: {error}"));
                }
            }
            report.partitions.push(outcome);
        }

        report
    }

    fn write_partition(
        pool: &PartitionPool,
        registry: &TopicRegistry,
        partition: &PartitionId,
        batch: Vec<BufferedMessage>,
    ) -> PartitionOutcome {
        let dropped = batch.len();
        let failed = |error: String| PartitionOutcome::Failed {
            partition: partition.clone(),
            dropped,
            error,
        };

        let Some(store) = pool.get(partition) else {
            return failed("partition not open".to_string());
        };

        let mut records: Vec<Record> = Vec::with_capacity(batch.len());
        for buffered in &batch {
            // Routes were resolved when grouping
            let Some(route) = registry.route(&buffered.message.topic) else {
                continue;
            };
            match route.transform.apply(&buffered.message.payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let topic = &buffered.message.topic;
                    return failed(format!("transform failed on {topic}: {e}"));
                }
            }
        }

        match store.write_batch(records) {
            Ok(written) => {
                debug!(partition = %partition, records = written, "Wrote batch");
                PartitionOutcome::Written {
                    partition: partition.clone(),
                    records: written,
                }
            }
            Err(e) => failed(e.to_string()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;
    use crate::config::TopicConfig;
    use crate::transform::{JsonTransform, TransformError};
    use tidepool_core::Message;
    use tidepool_storage::{MemoryDatastore, Schema, Session};

    fn partition(name: &str) -> PartitionId {
        PartitionId::new(name).unwrap()
    }

    async fn setup(topics: Vec<TopicConfig>) -> (TopicRegistry, PartitionPool, MemoryDatastore) {
        let registry = TopicRegistry::new(&topics).unwrap();
        let datastore = MemoryDatastore::new();
        let pool = PartitionPool::open(
            &datastore,
            &Session::anonymous(),
            &Schema::named("events"),
            registry.partitions(),
        )
        .await
        .unwrap();
        (registry, pool, datastore)
    }

    fn snapshot(messages: &[(&str, &str)]) -> Vec<BufferedMessage> {
        let buffer = MessageBuffer::new();
        for (topic, payload) in messages {
            buffer.push(Message::new(*topic, payload.to_string()));
        }
        buffer.drain()
    }

    #[tokio::test]
    async fn test_groups_by_partition_in_arrival_order() {
        let (registry, pool, datastore) = setup(vec![
            TopicConfig::new("a", partition("p1"), JsonTransform),
            TopicConfig::new("b", partition("p2"), JsonTransform),
            TopicConfig::new("c", partition("p1"), JsonTransform),
        ])
        .await;
        let metrics = EmitterMetrics::new();

        let report = BulkWriter::write(
            &pool,
            &registry,
            snapshot(&[
                ("a", r#"{"n":1}"#),
                ("b", r#"{"n":2}"#),
                ("c", r#"{"n":3}"#),
                ("a", r#"{"n":4}"#),
            ]),
            &metrics,
        );

        assert_eq!(report.records_written(), 4);
        let p1: Vec<_> = datastore
            .records(&partition("p1"))
            .iter()
            .map(|r| r["n"].as_i64().unwrap())
            .collect();
        assert_eq!(p1, [1, 3, 4]);
        assert_eq!(datastore.records(&partition("p2")).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_partitions_not_written() {
        let (registry, pool, datastore) = setup(vec![
            TopicConfig::new("a", partition("p1"), JsonTransform),
            TopicConfig::new("b", partition("p2"), JsonTransform),
        ])
        .await;

        let report = BulkWriter::write(
            &pool,
            &registry,
            snapshot(&[("a", "{}")]),
            &EmitterMetrics::new(),
        );

        assert_eq!(report.partitions.len(), 1);
        assert!(report.outcome(&partition("p2")).is_none());
        assert!(datastore.records(&partition("p2")).is_empty());
    }

    #[tokio::test]
    async fn test_transform_failure_isolated() {
        let failing = |_: &[u8]| -> Result<Record, TransformError> {
            Err(TransformError::Custom("bad payload".to_string()))
        };
        let (registry, pool, datastore) = setup(vec![
            TopicConfig::new("a", partition("p1"), JsonTransform),
            TopicConfig::new("bad", partition("p1"), failing),
            TopicConfig::new("b", partition("p2"), JsonTransform),
        ])
        .await;
        let metrics = EmitterMetrics::new();

        let report = BulkWriter::write(
            &pool,
            &registry,
            snapshot(&[("a", "{}"), ("bad", "{}"), ("b", "{}")]),
            &metrics,
        );

        assert!(matches!(
            report.outcome(&partition("p1")),
            Some(PartitionOutcome::Failed { dropped: 2, .. })
        ));
        assert!(datastore.records(&partition("p1")).is_empty());
        assert_eq!(datastore.records(&partition("p2")).len(), 1);
        assert_eq!(report.records_dropped(), 2);

        let status = metrics.snapshot(crate::status::PersistenceState::Ready, 0, false);
        assert_eq!(status.batches_failed, 1);
        assert_eq!(status.batches_written, 1);
        assert!(status.last_error.unwrap().contains("bad payload"));
    }

    #[tokio::test]
    async fn test_transform_panic_isolated() {
        let panicking = |_: &[u8]| -> Result<Record, TransformError> {
            panic!("transform bug");
        };
        let (registry, pool, datastore) = setup(vec![
            TopicConfig::new("a", partition("p1"), panicking),
            TopicConfig::new("b", partition("p2"), JsonTransform),
        ])
        .await;
        let metrics = EmitterMetrics::new();

        let report = BulkWriter::write(
            &pool,
            &registry,
            snapshot(&[("a", "{}"), ("b", r#"{"n":2}"#), ("a", "{}")]),
            &metrics,
        );

        match report.outcome(&partition("p1")) {
            Some(PartitionOutcome::Failed { dropped, error, .. }) => {
                assert_eq!(*dropped, 2);
                assert!(error.contains("transform bug"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(datastore.records(&partition("p2")).len(), 1);

        let status = metrics.snapshot(crate::status::PersistenceState::Ready, 0, false);
        assert_eq!(status.messages_dropped, 2);
        assert_eq!(status.messages_persisted, 1);
    }

    #[tokio::test]
    async fn test_write_failure_isolated() {
        let (registry, pool, datastore) = setup(vec![
            TopicConfig::new("a", partition("p1"), JsonTransform),
            TopicConfig::new("b", partition("p2"), JsonTransform),
        ])
        .await;
        datastore.store(&partition("p2")).unwrap().fail_writes(true);

        let report = BulkWriter::write(
            &pool,
            &registry,
            snapshot(&[("a", "{}"), ("b", "{}"), ("b", "{}")]),
            &EmitterMetrics::new(),
        );

        assert_eq!(report.records_written(), 1);
        assert_eq!(report.records_dropped(), 2);
        assert_eq!(datastore.records(&partition("p1")).len(), 1);
    }
}
