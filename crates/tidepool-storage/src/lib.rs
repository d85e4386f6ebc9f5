//! # Tidepool Storage
//!
//! Partitioned record storage for Tidepool.
//!
//! Records are JSON objects written in batches to independently stored
//! partitions. Every partition is opened on behalf of a [`Session`] and
//! validates records against a [`Schema`].
//!
//! ## Features
//!
//! - **PartitionStore trait**: Batch writes, compaction, size and lifecycle of one partition
//! - **Datastore trait**: Opens partition stores for a session
//! - **RedbDatastore**: One redb file per partition, for production
//! - **MemoryDatastore**: In-memory implementation with fault switches for testing
//! - **SessionProvider**: Login/logout gating access to partitions
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidepool_storage::{
//!     Datastore, PartitionId, RedbDatastore, RedbDatastoreConfig, Schema, Session,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let datastore = RedbDatastore::new(RedbDatastoreConfig::with_base_dir("./data"));
//!     let partition = PartitionId::new("temperature").unwrap();
//!     let store = datastore
//!         .open(&Session::anonymous(), &partition, &Schema::named("sensorData"))
//!         .await
//!         .unwrap();
//!
//!     let record = serde_json::json!({ "sensorId": "sensor-1", "value": 21.5 });
//!     store.write_batch(vec![record.as_object().cloned().unwrap()]).unwrap();
//!     store.close().unwrap();
//! }
//! ```

pub mod error;
pub mod memory;
pub mod partition;
pub mod redb_store;
pub mod schema;
pub mod session;
pub mod store;

// Re-exports
pub use error::StorageError;
pub use memory::{MemoryDatastore, MemoryPartitionStore};
pub use partition::PartitionId;
pub use redb_store::{
    compact_partition_file, discover_partitions, RedbDatastore, RedbDatastoreConfig,
    RedbPartitionStore, PARTITION_EXTENSION,
};
pub use schema::{new_object_id, FieldKind, FieldSpec, Record, Schema, StoredRecord};
pub use session::{Credentials, LocalSessionProvider, Session, SessionProvider};
pub use store::{Datastore, PartitionStore};
