//! Error types for the durable emitter

use thiserror::Error;
use tidepool_core::BusError;
use tidepool_storage::StorageError;

/// Errors returned from [`emit`](crate::DurableEmitter::emit)
///
/// Persistence never fails an emit: only a closed emitter or the base bus
/// itself can.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The emitter has been closed; the message was not forwarded
    #[error("emitter is closed")]
    Closed,

    /// The base bus rejected the message
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Errors that can occur constructing or closing an emitter
#[derive(Debug, Error)]
pub enum EmitterError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The same topic was registered twice
    #[error("Duplicate topic: {0}")]
    DuplicateTopic(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Base bus error
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl From<EmitError> for BusError {
    fn from(e: EmitError) -> Self {
        match e {
            EmitError::Closed => BusError::Closed,
            EmitError::Bus(inner) => inner,
        }
    }
}

/// Result type alias for emitter operations
pub type EmitterResult<T> = Result<T, EmitterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_maps_to_bus_closed() {
        let err: BusError = EmitError::Closed.into();
        assert!(matches!(err, BusError::Closed));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(EmitError::Closed.to_string(), "emitter is closed");
        let err = EmitterError::DuplicateTopic("temp/sensor-1".to_string());
        assert!(err.to_string().contains("temp/sensor-1"));
    }
}
