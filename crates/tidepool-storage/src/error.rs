//! Error types for tidepool-storage
//!
//! This module defines the error types used throughout the storage crate.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested item was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Database engine error
    #[error("Database error: {0}")]
    Database(String),

    /// A record does not match the partition's schema
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Partition identifier is not usable as a storage name
    #[error("Invalid partition id: {0}")]
    InvalidPartition(String),

    /// Authentication or session setup failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The store has already been closed
    #[error("Store is closed")]
    Closed,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new SchemaViolation error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaViolation(message.into())
    }

    /// Create a new Database error
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    /// Create a new Auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = StorageError::not_found("temperature");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }

    #[test]
    fn test_schema_violation() {
        let err = StorageError::schema("missing field 'value'");
        assert!(matches!(err, StorageError::SchemaViolation(_)));
        assert!(err.to_string().starts_with("Schema violation"));
    }
}
