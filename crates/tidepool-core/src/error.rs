//! Error types for Tidepool core

use thiserror::Error;

/// Errors returned by a [`Bus`](crate::Bus)
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("Invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Errors related to topic names and subscription patterns
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic must not be empty")]
    Empty,

    #[error("wildcards are not allowed in a published topic: {0}")]
    WildcardInTopic(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },
}
