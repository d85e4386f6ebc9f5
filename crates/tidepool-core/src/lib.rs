//! # Tidepool Core
//!
//! Core types shared by every Tidepool crate.
//!
//! ## Key Types
//!
//! - [`Message`]: A published message (topic + payload + creation timestamp)
//! - [`Bus`]: The publish entry point of a pub/sub bus
//! - [`LocalBus`]: In-process bus with MQTT-style topic patterns
//! - [`TopicPattern`]: Compiled subscription pattern (`+` and `#` wildcards)

pub mod bus;
pub mod error;
pub mod local_bus;
pub mod message;
pub mod topic;

// Re-export main types
pub use bus::Bus;
pub use error::{BusError, TopicError};
pub use local_bus::{LocalBus, LocalSubscription, SubscriptionId};
pub use message::Message;
pub use topic::{validate_topic, TopicPattern};
