//! redb-backed partition stores
//!
//! Each partition is its own redb file, laid out as
//! `<base_dir>/<user_id>/<partition>.redb`. Records of a schema live in a
//! table named after the schema, keyed by a monotonically increasing `u64`,
//! with the JSON-encoded record as value.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redb::{Builder, Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::partition::PartitionId;
use crate::schema::{Record, Schema, StoredRecord};
use crate::session::Session;
use crate::store::{Datastore, PartitionStore};

/// File extension of partition files
pub const PARTITION_EXTENSION: &str = "redb";

/// Configuration for redb storage
#[derive(Debug, Clone)]
pub struct RedbDatastoreConfig {
    /// Directory holding one sub-directory per user
    pub base_dir: PathBuf,
    /// Cache size in bytes, per partition
    pub cache_size: usize,
}

impl Default for RedbDatastoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./tidepool-data"),
            cache_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl RedbDatastoreConfig {
    /// Create a configuration with a custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Path of a partition file for a session
    pub fn partition_path(&self, session: &Session, partition: &PartitionId) -> PathBuf {
        self.base_dir
            .join(&session.user_id)
            .join(format!("{partition}.{PARTITION_EXTENSION}"))
    }
}

/// Datastore that keeps every partition in its own redb file
#[derive(Debug, Clone, Default)]
pub struct RedbDatastore {
    config: RedbDatastoreConfig,
}

impl RedbDatastore {
    /// Create a datastore
    pub fn new(config: RedbDatastoreConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbDatastoreConfig {
        &self.config
    }
}

#[async_trait]
impl Datastore for RedbDatastore {
    async fn open(
        &self,
        session: &Session,
        partition: &PartitionId,
        schema: &Schema,
    ) -> Result<Arc<dyn PartitionStore>, StorageError> {
        schema.check_name()?;
        let path = self.config.partition_path(session, partition);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let store = RedbPartitionStore::open(
            path,
            partition.clone(),
            schema.clone(),
            self.config.cache_size,
        )?;
        Ok(Arc::new(store))
    }
}

/// One partition held in a redb file
///
/// `Database::compact` needs exclusive access, so the database sits behind a
/// mutex that every operation takes. `None` means closed.
pub struct RedbPartitionStore {
    partition: PartitionId,
    path: PathBuf,
    schema: Schema,
    db: Mutex<Option<Database>>,
}

impl std::fmt::Debug for RedbPartitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbPartitionStore")
            .field("partition", &self.partition)
            .field("path", &self.path)
            .field("schema", &self.schema.name)
            .finish()
    }
}

impl RedbPartitionStore {
    /// Open or create the partition file
    #[instrument(skip(path, schema), fields(path = %path.display()))]
    pub fn open(
        path: PathBuf,
        partition: PartitionId,
        schema: Schema,
        cache_size: usize,
    ) -> Result<Self, StorageError> {
        schema.check_name()?;
        let mut builder = Builder::new();
        builder.set_cache_size(cache_size);
        let db = builder.create(&path).map_err(StorageError::database)?;

        let store = Self {
            partition,
            path,
            schema,
            db: Mutex::new(Some(db)),
        };
        store.init_table()?;

        info!(partition = %store.partition, "Opened partition store");
        Ok(store)
    }

    fn table(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.schema.name)
    }

    /// Create the schema table if it doesn't exist
    fn init_table(&self) -> Result<(), StorageError> {
        let guard = self.db.lock();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;

        let write_txn = db.begin_write().map_err(StorageError::database)?;
        write_txn
            .open_table(self.table())
            .map_err(StorageError::database)?;
        write_txn.commit().map_err(StorageError::database)?;

        debug!(table = %self.schema.name, "Initialized partition table");
        Ok(())
    }

    /// The schema records are validated against
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl PartitionStore for RedbPartitionStore {
    fn partition(&self) -> &PartitionId {
        &self.partition
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn write_batch(&self, records: Vec<Record>) -> Result<usize, StorageError> {
        for record in &records {
            self.schema.validate(record)?;
        }

        let guard = self.db.lock();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;

        // Dropping an uncommitted transaction aborts it
        let write_txn = db.begin_write().map_err(StorageError::database)?;
        {
            let mut table = write_txn
                .open_table(self.table())
                .map_err(StorageError::database)?;

            let mut next = match table.last().map_err(StorageError::database)? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };

            for record in &records {
                let value = serde_json::to_vec(record)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                table
                    .insert(next, value.as_slice())
                    .map_err(StorageError::database)?;
                next += 1;
            }
        }
        write_txn.commit().map_err(StorageError::database)?;

        debug!(partition = %self.partition, count = records.len(), "Wrote batch");
        Ok(records.len())
    }

    fn compact(&self) -> Result<bool, StorageError> {
        let mut guard = self.db.lock();
        let db = guard.as_mut().ok_or(StorageError::Closed)?;
        let compacted = db.compact().map_err(StorageError::database)?;
        debug!(partition = %self.partition, compacted, "Compaction finished");
        Ok(compacted)
    }

    fn size_on_disk(&self) -> Result<u64, StorageError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn count(&self) -> Result<u64, StorageError> {
        let guard = self.db.lock();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;

        let read_txn = db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(self.table())
            .map_err(StorageError::database)?;
        table.len().map_err(StorageError::database)
    }

    fn read_all(&self) -> Result<Vec<StoredRecord>, StorageError> {
        let guard = self.db.lock();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;

        let read_txn = db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(self.table())
            .map_err(StorageError::database)?;

        let mut results = Vec::new();
        for entry in table.iter().map_err(StorageError::database)? {
            let (key, value) = entry.map_err(StorageError::database)?;
            let record: Record = serde_json::from_slice(value.value())
                .map_err(|e| StorageError::Deserialization(e.to_string()))?;
            results.push(StoredRecord {
                key: key.value(),
                record,
            });
        }

        Ok(results)
    }

    fn close(&self) -> Result<(), StorageError> {
        match self.db.lock().take() {
            Some(db) => {
                drop(db);
                info!(partition = %self.partition, "Closed partition store");
                Ok(())
            }
            None => Err(StorageError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.db.lock().is_none()
    }
}

/// Compact a partition file that no store has open
///
/// Opens the file without touching its tables, so no schema is needed.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn compact_partition_file(path: &Path) -> Result<bool, StorageError> {
    let mut db = Database::open(path).map_err(StorageError::database)?;
    let compacted = db.compact().map_err(StorageError::database)?;
    info!(compacted, "Compacted partition file");
    Ok(compacted)
}

/// Find every partition file below a base directory
///
/// Returns `(user_id, partition, path)` triples sorted by path.
pub fn discover_partitions(
    base_dir: &Path,
) -> Result<Vec<(String, PartitionId, PathBuf)>, StorageError> {
    let mut found = Vec::new();

    for user_entry in std::fs::read_dir(base_dir)? {
        let user_entry = user_entry?;
        if !user_entry.file_type()?.is_dir() {
            continue;
        }
        let user_id = user_entry.file_name().to_string_lossy().into_owned();

        for file in std::fs::read_dir(user_entry.path())? {
            let path = file?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PARTITION_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(partition) = PartitionId::new(stem) {
                found.push((user_id.clone(), partition, path));
            }
        }
    }

    found.sort_by(|a, b| a.2.cmp(&b.2));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::schema::{FieldKind, FieldSpec};

    fn create_test_store(schema: Schema) -> (RedbPartitionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbPartitionStore::open(
            temp_dir.path().join("test.redb"),
            PartitionId::new("test").unwrap(),
            schema,
            1024 * 1024,
        )
        .unwrap();
        (store, temp_dir)
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let (store, _temp) = create_test_store(Schema::named("events"));

        let written = store
            .write_batch(vec![record(json!({"n": 1})), record(json!({"n": 2}))])
            .unwrap();
        assert_eq!(written, 2);
        store.write_batch(vec![record(json!({"n": 3}))]).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().map(|r| r.key).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(all[2].record["n"], 3);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_invalid_record_aborts_whole_batch() {
        let schema = Schema::named("readings")
            .with_field(FieldSpec::required("value", FieldKind::Double));
        let (store, _temp) = create_test_store(schema);

        let result = store.write_batch(vec![
            record(json!({"value": 1.0})),
            record(json!({"other": true})),
        ]);
        assert!(matches!(result, Err(StorageError::SchemaViolation(_))));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_compact_and_size() {
        let (store, _temp) = create_test_store(Schema::named("events"));
        let batch: Vec<Record> = (0..200)
            .map(|i| record(json!({"i": i, "pad": "x".repeat(512)})))
            .collect();
        store.write_batch(batch).unwrap();

        assert!(store.size_on_disk().unwrap() > 0);
        store.compact().unwrap();
        assert_eq!(store.count().unwrap(), 200);
    }

    #[test]
    fn test_blank_schema_name_rejected_before_create() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.redb");
        let result = RedbPartitionStore::open(
            path.clone(),
            PartitionId::new("test").unwrap(),
            Schema::named(""),
            1024 * 1024,
        );
        assert!(matches!(result, Err(StorageError::SchemaViolation(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_datastore_rejects_blank_schema_name() {
        let temp_dir = TempDir::new().unwrap();
        let datastore = RedbDatastore::new(RedbDatastoreConfig::with_base_dir(temp_dir.path()));
        let result = datastore
            .open(
                &Session::anonymous(),
                &PartitionId::new("p").unwrap(),
                &Schema::named(""),
            )
            .await;
        assert!(matches!(result, Err(StorageError::SchemaViolation(_))));
        assert!(!temp_dir.path().join("anonymous").exists());
    }

    #[test]
    fn test_close_once() {
        let (store, _temp) = create_test_store(Schema::named("events"));
        assert!(!store.is_closed());

        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.close(), Err(StorageError::Closed)));
        assert!(matches!(
            store.write_batch(vec![record(json!({}))]),
            Err(StorageError::Closed)
        ));
    }

    #[test]
    fn test_reopen_keeps_records_and_keys() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("p.redb");
        let partition = PartitionId::new("p").unwrap();

        let store = RedbPartitionStore::open(
            path.clone(),
            partition.clone(),
            Schema::named("events"),
            1024 * 1024,
        )
        .unwrap();
        store.write_batch(vec![record(json!({"n": 1}))]).unwrap();
        store.close().unwrap();

        let store =
            RedbPartitionStore::open(path, partition, Schema::named("events"), 1024 * 1024)
                .unwrap();
        store.write_batch(vec![record(json!({"n": 2}))]).unwrap();
        let keys: Vec<u64> = store.read_all().unwrap().iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_datastore_layout_and_discovery() {
        let temp_dir = TempDir::new().unwrap();
        let datastore = RedbDatastore::new(RedbDatastoreConfig::with_base_dir(temp_dir.path()));
        let session = Session::anonymous();

        for name in ["humidity", "temperature"] {
            let partition = PartitionId::new(name).unwrap();
            let store = datastore
                .open(&session, &partition, &Schema::named("sensorData"))
                .await
                .unwrap();
            assert_eq!(
                store.path().unwrap(),
                temp_dir
                    .path()
                    .join("anonymous")
                    .join(format!("{name}.redb"))
            );
            store.close().unwrap();
        }

        let found = discover_partitions(temp_dir.path()).unwrap();
        let names: Vec<&str> = found.iter().map(|(_, p, _)| p.as_str()).collect();
        assert_eq!(names, vec!["humidity", "temperature"]);
        assert!(found.iter().all(|(user, _, _)| user == "anonymous"));
    }
}
