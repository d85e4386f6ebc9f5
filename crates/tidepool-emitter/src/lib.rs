//! # Tidepool Emitter
//!
//! Durable persistence for a publish/subscribe bus.
//!
//! [`DurableEmitter`] wraps any [`Bus`](tidepool_core::Bus). Messages on
//! configured topics are buffered in memory and written in batches, one
//! transaction per partition, while every message is still delivered
//! through the wrapped bus without waiting on storage.
//!
//! ## Flushing
//!
//! A flush is triggered inline by `emit` once the sync interval has elapsed
//! since the last inline flush, and by a background ticker every cleanup
//! interval. Both feed a single flush worker.
//!
//! ## Compaction
//!
//! A separate ticker checks partition sizes. Oversized partitions are
//! compacted while the flush ticker is paused and inline flushes are
//! suppressed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidepool_core::{LocalBus, Message};
//! use tidepool_emitter::{DurableEmitter, EmitterConfig, JsonTransform, TopicConfig};
//! use tidepool_storage::{PartitionId, Schema};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EmitterConfig::new(Schema::named("events")).with_topic(TopicConfig::new(
//!         "temp/sensor-1",
//!         PartitionId::new("temperature").unwrap(),
//!         JsonTransform,
//!     ));
//!
//!     let emitter = DurableEmitter::with_local_storage(LocalBus::new(), config).unwrap();
//!     emitter.wait_ready().await;
//!
//!     emitter
//!         .emit(Message::new("temp/sensor-1", r#"{"value": 21.5}"#))
//!         .await
//!         .unwrap();
//!
//!     emitter.close().await.unwrap();
//! }
//! ```

pub mod buffer;
pub mod compaction;
pub mod config;
pub mod emitter;
pub mod error;
pub mod registry;
pub mod status;
pub mod ticker;
pub mod transform;
pub mod writer;

// Re-exports
pub use buffer::{BufferedMessage, MessageBuffer};
pub use compaction::{CompactionMonitor, CompactionPolicy, CompactionReport};
pub use config::{EmitterConfig, EmitterSettings, TopicConfig};
pub use emitter::DurableEmitter;
pub use error::{EmitError, EmitterError, EmitterResult};
pub use registry::{PartitionPool, TopicRegistry, TopicRoute};
pub use status::{EmitterMetrics, EmitterStatus, PersistenceState};
pub use ticker::Ticker;
pub use transform::{FieldMapTransform, FieldMapping, JsonTransform, Transform, TransformError};
pub use writer::{BulkWriter, FlushReport, PartitionOutcome};
