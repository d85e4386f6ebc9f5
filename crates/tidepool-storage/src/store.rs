//! Storage traits
//!
//! A [`Datastore`] opens one [`PartitionStore`] per partition. Stores are
//! synchronous: every method runs to completion on the calling thread, and
//! implementations serialise `write_batch` and `compact` on the same handle.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::partition::PartitionId;
use crate::schema::{Record, Schema, StoredRecord};
use crate::session::Session;

/// An open storage handle for one partition
pub trait PartitionStore: Send + Sync {
    /// The partition this store holds
    fn partition(&self) -> &PartitionId;

    /// Backing file, if the store lives on disk
    fn path(&self) -> Option<&Path>;

    /// Validate and write all records in one transaction
    ///
    /// Either every record is written or none is. Returns the number of
    /// records written.
    fn write_batch(&self, records: Vec<Record>) -> Result<usize, StorageError>;

    /// Reclaim unused space; returns whether anything was compacted
    fn compact(&self) -> Result<bool, StorageError>;

    /// Current size of the backing storage in bytes
    fn size_on_disk(&self) -> Result<u64, StorageError>;

    /// Number of stored records
    fn count(&self) -> Result<u64, StorageError>;

    /// All stored records in key order
    fn read_all(&self) -> Result<Vec<StoredRecord>, StorageError>;

    /// Release the handle
    ///
    /// Returns [`StorageError::Closed`] if the store was already closed.
    fn close(&self) -> Result<(), StorageError>;

    /// Whether [`close`](Self::close) has been called
    fn is_closed(&self) -> bool;
}

/// Opens partition stores on behalf of a session
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Open (creating if needed) the store for a partition
    async fn open(
        &self,
        session: &Session,
        partition: &PartitionId,
        schema: &Schema,
    ) -> Result<Arc<dyn PartitionStore>, StorageError>;
}
