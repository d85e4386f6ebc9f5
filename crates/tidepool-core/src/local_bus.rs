//! In-process pub/sub bus
//!
//! Provides a channel-based bus for embedding Tidepool in a single process
//! and for testing without a broker.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidepool_core::{Bus, LocalBus, Message};
//!
//! let bus = LocalBus::new();
//! let mut sub = bus.subscribe("temp/+").unwrap();
//!
//! bus.publish(Message::new("temp/sensor-1", "21.5")).await.unwrap();
//! let msg = sub.recv().await.unwrap();
//! assert_eq!(msg.topic, "temp/sensor-1");
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::Bus;
use crate::error::BusError;
use crate::message::Message;
use crate::topic::{validate_topic, TopicPattern};

/// Identifier of a subscription on a [`LocalBus`]
pub type SubscriptionId = u64;

struct Subscriber {
    pattern: TopicPattern,
    tx: mpsc::Sender<Message>,
}

/// Receiving half of a [`LocalBus`] subscription
pub struct LocalSubscription {
    id: SubscriptionId,
    pattern: TopicPattern,
    rx: mpsc::Receiver<Message>,
}

impl LocalSubscription {
    /// Subscription identifier (for [`LocalBus::unsubscribe`])
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The pattern this subscription listens on
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the bus is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take the next message if one is queued
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

/// Channel-based bus with MQTT-style subscription patterns
///
/// Each subscriber gets a bounded queue. A full queue drops the message for
/// that subscriber only (logged), so one slow consumer never blocks
/// publishers or other subscribers.
pub struct LocalBus {
    subscribers: DashMap<SubscriptionId, Subscriber>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    /// Create a bus with the default per-subscriber queue size (1024)
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a bus with a specific per-subscriber queue size
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to every topic matching `pattern`
    pub fn subscribe(&self, pattern: &str) -> Result<LocalSubscription, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let pattern = TopicPattern::parse(pattern)?;
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers.insert(
            id,
            Subscriber {
                pattern: pattern.clone(),
                tx,
            },
        );
        debug!(id, pattern = %pattern, "Subscribed");

        Ok(LocalSubscription { id, pattern, rx })
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether [`Bus::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        validate_topic(&message.topic).map_err(BusError::Topic)?;

        let mut gone = Vec::new();
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if !sub.pattern.matches(&message.topic) {
                continue;
            }
            match sub.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscription = *entry.key(),
                        topic = %message.topic,
                        "Subscriber queue full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*entry.key()),
            }
        }

        // Removal happens after iteration to avoid holding shard locks
        for id in gone {
            self.subscribers.remove(&id);
            debug!(id, "Removed closed subscriber");
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the senders ends every subscriber's stream
        self.subscribers.clear();
        debug!("Local bus closed");
        Ok(())
    }
}
