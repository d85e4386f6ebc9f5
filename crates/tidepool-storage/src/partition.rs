//! Partition identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Identifier of an independently stored partition
///
/// Partition ids double as file names, so they are restricted to ASCII
/// letters, digits, `_`, `-` and `.` (not leading).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionId(String);

impl PartitionId {
    /// Create a validated partition id
    pub fn new(value: impl Into<String>) -> Result<Self, StorageError> {
        let value = value.into();
        if value.is_empty() {
            return Err(StorageError::InvalidPartition("empty".to_string()));
        }
        if value.starts_with('.') {
            return Err(StorageError::InvalidPartition(value));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(StorageError::InvalidPartition(value));
        }
        Ok(Self(value))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PartitionId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PartitionId {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartitionId> for String {
    fn from(id: PartitionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["temperature", "humidity-2", "zone_a.v1", "P1"] {
            assert_eq!(PartitionId::new(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["", "../etc", "a/b", ".hidden", "with space"] {
            assert!(PartitionId::new(id).is_err(), "{id} should be rejected");
        }
    }

    #[test]
    fn test_serde_validates() {
        let ok: PartitionId = serde_json::from_str("\"temperature\"").unwrap();
        assert_eq!(ok.to_string(), "temperature");

        let bad: Result<PartitionId, _> = serde_json::from_str("\"a/b\"");
        assert!(bad.is_err());
    }
}
