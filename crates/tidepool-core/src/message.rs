//! Published messages

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A message published on the bus
///
/// Carries the topic it was published on, an opaque payload and the
/// wall-clock time (Unix millis) stamped when the message was built. The
/// durable emitter keeps its own monotonic arrival instant when buffering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Topic the message was published on (e.g. `temp/sensor-1`)
    pub topic: String,
    /// Opaque payload bytes
    pub payload: Bytes,
    /// Creation time (Unix millis)
    pub timestamp_millis: i64,
}

impl Message {
    /// Create a new message stamped with the current time
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Override the creation timestamp
    pub fn with_timestamp(mut self, timestamp_millis: i64) -> Self {
        self.timestamp_millis = timestamp_millis;
        self
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stamps_time() {
        let before = chrono::Utc::now().timestamp_millis();
        let msg = Message::new("a/b", &b"hello"[..]);
        let after = chrono::Utc::now().timestamp_millis();

        assert_eq!(msg.topic, "a/b");
        assert_eq!(msg.len(), 5);
        assert!(msg.timestamp_millis >= before && msg.timestamp_millis <= after);
    }

    #[test]
    fn test_with_timestamp() {
        let msg = Message::new("t", Bytes::new()).with_timestamp(42);
        assert_eq!(msg.timestamp_millis, 42);
        assert!(msg.is_empty());
    }
}
