//! Topic registry and partition pool
//!
//! The registry is built once from the topic list and never changes. The
//! pool holds one open store per distinct partition of the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tidepool_core::validate_topic;
use tidepool_storage::{Datastore, PartitionId, PartitionStore, Schema, Session, StorageError};
use tracing::{debug, info, instrument, warn};

use crate::config::TopicConfig;
use crate::error::{EmitterError, EmitterResult};
use crate::transform::Transform;

/// Where a topic's messages go
#[derive(Clone)]
pub struct TopicRoute {
    pub partition: PartitionId,
    pub transform: Arc<dyn Transform>,
}

impl std::fmt::Debug for TopicRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRoute")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// Static mapping from topic name to partition and transform
#[derive(Debug, Default)]
pub struct TopicRegistry {
    routes: HashMap<String, TopicRoute>,
    /// Distinct partitions in first-seen order
    partitions: Vec<PartitionId>,
}

impl TopicRegistry {
    /// Build a registry from topic configurations
    ///
    /// Topic names must be concrete (no wildcards) and unique.
    pub fn new(topics: &[TopicConfig]) -> EmitterResult<Self> {
        let mut registry = Self::default();

        for topic in topics {
            validate_topic(&topic.name)
                .map_err(|e| EmitterError::Config(format!("topic '{}': {e}", topic.name)))?;
            if registry.routes.contains_key(&topic.name) {
                return Err(EmitterError::DuplicateTopic(topic.name.clone()));
            }
            if !registry.partitions.contains(&topic.partition) {
                registry.partitions.push(topic.partition.clone());
            }
            registry.routes.insert(
                topic.name.clone(),
                TopicRoute {
                    partition: topic.partition.clone(),
                    transform: topic.transform.clone(),
                },
            );
        }

        Ok(registry)
    }

    /// Route of a topic, if registered
    pub fn route(&self, topic: &str) -> Option<&TopicRoute> {
        self.routes.get(topic)
    }

    /// Whether a topic is registered
    pub fn contains(&self, topic: &str) -> bool {
        self.routes.contains_key(topic)
    }

    /// Distinct partitions in first-seen order
    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    /// Number of registered topics
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no topic is registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// One open store per partition
pub struct PartitionPool {
    stores: Vec<Arc<dyn PartitionStore>>,
    index: HashMap<PartitionId, usize>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PartitionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionPool")
            .field("partitions", &self.index.keys().collect::<Vec<_>>())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl PartitionPool {
    /// Open a store for every partition
    ///
    /// If any open fails, the stores already opened are closed again before
    /// the error is returned.
    #[instrument(skip_all, fields(partitions = partitions.len()))]
    pub async fn open(
        datastore: &dyn Datastore,
        session: &Session,
        schema: &Schema,
        partitions: &[PartitionId],
    ) -> Result<Self, StorageError> {
        let mut stores: Vec<Arc<dyn PartitionStore>> = Vec::with_capacity(partitions.len());
        let mut index = HashMap::with_capacity(partitions.len());

        for partition in partitions {
            if index.contains_key(partition) {
                continue;
            }
            match datastore.open(session, partition, schema).await {
                Ok(store) => {
                    debug!(partition = %partition, path = ?store.path(), "Opened partition");
                    index.insert(partition.clone(), stores.len());
                    stores.push(store);
                }
                Err(e) => {
                    for store in &stores {
                        if let Err(close_err) = store.close() {
                            warn!(
                                partition = %store.partition(),
                                error = %close_err,
                                "Failed to close partition"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(count = stores.len(), "Partition pool opened");
        Ok(Self {
            stores,
            index,
            closed: AtomicBool::new(false),
        })
    }

    /// Store of a partition
    pub fn get(&self, partition: &PartitionId) -> Option<&Arc<dyn PartitionStore>> {
        self.index.get(partition).map(|&i| &self.stores[i])
    }

    /// All stores in open order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PartitionStore>> {
        self.stores.iter()
    }

    /// Number of open stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether the pool holds no store
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Close every store
    ///
    /// Only the first call closes anything; it returns the number of stores
    /// closed cleanly. Later calls return 0.
    pub fn close(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let mut closed = 0;
        for store in &self.stores {
            match store.close() {
                Ok(()) => closed += 1,
                Err(e) => {
                    warn!(partition = %store.partition(), error = %e, "Failed to close partition")
                }
            }
        }
        info!(closed, "Partition pool closed");
        closed
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
