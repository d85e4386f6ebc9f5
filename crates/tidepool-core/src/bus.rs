//! The publish side of a pub/sub bus
//!
//! Tidepool never manages subscriptions itself. It only needs the bus's
//! single publish entry point, so wrappers (like the durable emitter) can
//! implement the same trait and delegate to the wrapped bus.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;
use crate::message::Message;

/// Publish entry point of a pub/sub bus
#[async_trait]
pub trait Bus: Send + Sync {
    /// Deliver a message to every matching subscriber
    async fn publish(&self, message: Message) -> Result<(), BusError>;

    /// Stop accepting messages
    ///
    /// Default is a no-op for buses without a lifecycle.
    async fn close(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[async_trait]
impl<B: Bus + ?Sized> Bus for Arc<B> {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        (**self).publish(message).await
    }

    async fn close(&self) -> Result<(), BusError> {
        (**self).close().await
    }
}
