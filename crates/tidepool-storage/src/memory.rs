//! In-memory storage implementations
//!
//! This module provides an in-memory datastore suitable for testing and
//! embedding. Stores stay reachable through the datastore after they are
//! handed out, so tests can inspect written records and lifecycle counters,
//! and fault switches let tests drive the failure paths.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::StorageError;
use crate::partition::PartitionId;
use crate::schema::{Record, Schema, StoredRecord};
use crate::session::Session;
use crate::store::{Datastore, PartitionStore};

/// In-memory implementation of [`PartitionStore`]
#[derive(Debug)]
pub struct MemoryPartitionStore {
    partition: PartitionId,
    schema: Schema,
    records: Mutex<Vec<StoredRecord>>,
    next_key: AtomicU64,
    /// Reported size; `None` derives it from the encoded records
    size_override: Mutex<Option<u64>>,
    compactions: AtomicU64,
    close_calls: AtomicU64,
    closed: AtomicBool,
    fail_writes: AtomicBool,
    fail_compaction: AtomicBool,
}

impl MemoryPartitionStore {
    /// Create an empty store
    pub fn new(partition: PartitionId, schema: Schema) -> Self {
        Self {
            partition,
            schema,
            records: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(0),
            size_override: Mutex::new(None),
            compactions: AtomicU64::new(0),
            close_calls: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_compaction: AtomicBool::new(false),
        }
    }

    /// Records written so far
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().iter().map(|r| r.record.clone()).collect()
    }

    /// Pin the size reported by [`PartitionStore::size_on_disk`]
    pub fn set_size(&self, bytes: u64) {
        *self.size_override.lock() = Some(bytes);
    }

    /// Number of successful compactions
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::SeqCst)
    }

    /// Number of times `close` was called (including rejected calls)
    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent compactions fail
    pub fn fail_compaction(&self, fail: bool) {
        self.fail_compaction.store(fail, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        self.records
            .lock()
            .iter()
            .map(|r| serde_json::to_vec(&r.record).map_or(0, |v| v.len() as u64))
            .sum()
    }
}

impl PartitionStore for MemoryPartitionStore {
    fn partition(&self) -> &PartitionId {
        &self.partition
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn write_batch(&self, records: Vec<Record>) -> Result<usize, StorageError> {
        self.check_open()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("injected write failure".to_string()));
        }
        for record in &records {
            self.schema.validate(record)?;
        }

        let count = records.len();
        let mut stored = self.records.lock();
        for record in records {
            let key = self.next_key.fetch_add(1, Ordering::SeqCst);
            stored.push(StoredRecord { key, record });
        }

        trace!(partition = %self.partition, count, "Wrote batch");
        Ok(count)
    }

    fn compact(&self) -> Result<bool, StorageError> {
        self.check_open()?;
        if self.fail_compaction.load(Ordering::SeqCst) {
            return Err(StorageError::Io("injected compaction failure".to_string()));
        }
        self.compactions.fetch_add(1, Ordering::SeqCst);
        *self.size_override.lock() = None;
        debug!(partition = %self.partition, "Compacted");
        Ok(true)
    }

    fn size_on_disk(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        match *self.size_override.lock() {
            Some(size) => Ok(size),
            None => Ok(self.encoded_size()),
        }
    }

    fn count(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        Ok(self.records.lock().len() as u64)
    }

    fn read_all(&self) -> Result<Vec<StoredRecord>, StorageError> {
        self.check_open()?;
        Ok(self.records.lock().clone())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory implementation of [`Datastore`]
///
/// Opening the same partition twice returns the same store.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    stores: DashMap<PartitionId, Arc<MemoryPartitionStore>>,
    opens: AtomicU64,
    fail_open: AtomicBool,
}

impl MemoryDatastore {
    /// Create an empty datastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the store of a partition, if it was opened
    pub fn store(&self, partition: &PartitionId) -> Option<Arc<MemoryPartitionStore>> {
        self.stores.get(partition).map(|s| s.clone())
    }

    /// Records written to a partition (empty if never opened)
    pub fn records(&self, partition: &PartitionId) -> Vec<Record> {
        self.store(partition)
            .map(|s| s.records())
            .unwrap_or_default()
    }

    /// Number of successful `open` calls
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make subsequent opens fail
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn open(
        &self,
        _session: &Session,
        partition: &PartitionId,
        schema: &Schema,
    ) -> Result<Arc<dyn PartitionStore>, StorageError> {
        schema.check_name()?;
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StorageError::Io(format!(
                "injected open failure for {partition}"
            )));
        }

        let store = self
            .stores
            .entry(partition.clone())
            .or_insert_with(|| {
                Arc::new(MemoryPartitionStore::new(partition.clone(), schema.clone()))
            })
            .clone();
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(store)
    }
}
