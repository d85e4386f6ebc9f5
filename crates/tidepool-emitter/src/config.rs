//! Configuration for the durable emitter

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidepool_storage::{Credentials, PartitionId, Schema};

use crate::error::{EmitterError, EmitterResult};
use crate::transform::Transform;

/// Timing and storage settings
///
/// Every field has a default, so a partial TOML table is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterSettings {
    /// Directory holding the partition files
    pub data_dir: PathBuf,
    /// Minimum gap between inline-triggered flushes
    pub sync_interval_ms: u64,
    /// Period of the background flush
    pub cleanup_interval_ms: u64,
    /// Period of the partition size check
    pub compaction_interval_ms: u64,
    /// Partition size (in MB of 1,000,000 bytes) that triggers compaction
    pub compaction_threshold_mb: u64,
    /// Compact oversized partitions while opening them
    pub compact_on_open: bool,
    /// Flush the buffer one last time on close
    pub flush_on_close: bool,
    /// Login credentials; `None` uses an anonymous session
    pub credentials: Option<Credentials>,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tidepool-data"),
            sync_interval_ms: 5_000,
            cleanup_interval_ms: 60_000,
            compaction_interval_ms: 60 * 60 * 1000,
            compaction_threshold_mb: 100,
            compact_on_open: true,
            flush_on_close: true,
            credentials: None,
        }
    }
}

impl EmitterSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_millis(self.compaction_interval_ms)
    }

    /// Compaction threshold in bytes
    pub fn compaction_threshold_bytes(&self) -> u64 {
        self.compaction_threshold_mb.saturating_mul(1_000_000)
    }

    /// Check that both timers have a non-zero period
    pub fn validate(&self) -> EmitterResult<()> {
        if self.cleanup_interval_ms == 0 {
            return Err(EmitterError::Config(
                "cleanup_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.compaction_interval_ms == 0 {
            return Err(EmitterError::Config(
                "compaction_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A topic whose messages are persisted
#[derive(Clone)]
pub struct TopicConfig {
    /// Exact topic name
    pub name: String,
    /// Partition the records are written to
    pub partition: PartitionId,
    /// Payload to record mapping
    pub transform: Arc<dyn Transform>,
}

impl TopicConfig {
    /// Create a topic configuration
    pub fn new(
        name: impl Into<String>,
        partition: PartitionId,
        transform: impl Transform + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            partition,
            transform: Arc::new(transform),
        }
    }
}

impl fmt::Debug for TopicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicConfig")
            .field("name", &self.name)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// Configuration for a [`DurableEmitter`](crate::DurableEmitter)
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Shape of persisted records
    pub schema: Schema,
    /// Persisted topics
    pub topics: Vec<TopicConfig>,
    /// Timing and storage settings
    pub settings: EmitterSettings,
}

impl EmitterConfig {
    /// Create a configuration with default settings and no topics
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            topics: Vec::new(),
            settings: EmitterSettings::default(),
        }
    }

    /// Persist a topic
    pub fn with_topic(mut self, topic: TopicConfig) -> Self {
        self.topics.push(topic);
        self
    }

    /// Replace all settings
    pub fn with_settings(mut self, settings: EmitterSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.settings.data_dir = data_dir.into();
        self
    }

    /// Set the inline flush interval
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.settings.sync_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the background flush interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.settings.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the compaction check interval
    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.settings.compaction_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the compaction threshold in MB
    pub fn with_compaction_threshold_mb(mut self, megabytes: u64) -> Self {
        self.settings.compaction_threshold_mb = megabytes;
        self
    }

    /// Enable or disable compaction while opening partitions
    pub fn with_compact_on_open(mut self, enabled: bool) -> Self {
        self.settings.compact_on_open = enabled;
        self
    }

    /// Enable or disable the final flush on close
    pub fn with_flush_on_close(mut self, enabled: bool) -> Self {
        self.settings.flush_on_close = enabled;
        self
    }

    /// Log in with credentials before opening partitions
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.settings.credentials = Some(credentials);
        self
    }
}
