//! Record shapes
//!
//! A [`Schema`] names the table records are written to inside a partition
//! and describes the fields a record may carry. The emitter never looks at
//! it; stores validate every record against it on create and reject the
//! whole batch on the first violation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;

/// A persisted record: a JSON object
pub type Record = Map<String, Value>;

/// A record read back from a store together with its key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Monotonic key within the partition
    pub key: u64,
    /// The record body
    pub record: Record,
}

/// Type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Double,
    Bool,
    /// 24-character hex object id
    ObjectId,
    /// Any JSON value
    Json,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Double => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::ObjectId => value.as_str().is_some_and(is_object_id),
            FieldKind::Json => true,
        }
    }
}

/// Description of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub optional: bool,
}

impl FieldSpec {
    /// A required field
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    /// An optional field (may be absent or null)
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
        }
    }
}

/// Shape of the records persisted for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Entity name, used as the table name
    pub name: String,
    /// Declared fields; empty means records are not checked
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Field that must be present on every record
    #[serde(default)]
    pub primary_key: Option<String>,
}

impl Schema {
    /// A schema that accepts any record shape
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: None,
        }
    }

    /// Add a field
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the primary key
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    /// Check that the name can serve as a table name
    pub fn check_name(&self) -> Result<(), StorageError> {
        if self.name.trim().is_empty() {
            return Err(StorageError::schema("schema name must not be empty"));
        }
        Ok(())
    }

    /// Check a record against this schema
    pub fn validate(&self, record: &Record) -> Result<(), StorageError> {
        if let Some(pk) = &self.primary_key {
            if record.get(pk).is_none_or(Value::is_null) {
                return Err(StorageError::schema(format!(
                    "{}: missing primary key '{pk}'",
                    self.name
                )));
            }
        }

        if self.fields.is_empty() {
            return Ok(());
        }

        for key in record.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                return Err(StorageError::schema(format!(
                    "{}: unknown field '{key}'",
                    self.name
                )));
            }
        }

        for field in &self.fields {
            match record.get(&field.name) {
                None | Some(Value::Null) if field.optional => {}
                None | Some(Value::Null) => {
                    return Err(StorageError::schema(format!(
                        "{}: missing field '{}'",
                        self.name, field.name
                    )));
                }
                Some(value) if !field.kind.accepts(value) => {
                    return Err(StorageError::schema(format!(
                        "{}: field '{}' is not {:?}",
                        self.name, field.name, field.kind
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Mint a new object id: 4 bytes of Unix seconds followed by 8 random bytes
pub fn new_object_id() -> String {
    let secs = chrono::Utc::now().timestamp() as u32;
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&secs.to_be_bytes());
    rand::rng().fill(&mut bytes[4..]);
    hex::encode(bytes)
}

fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sensor_schema() -> Schema {
        Schema::named("sensorData")
            .with_field(FieldSpec::required("_id", FieldKind::ObjectId))
            .with_field(FieldSpec::required("sensorId", FieldKind::String))
            .with_field(FieldSpec::optional("sensorType", FieldKind::String))
            .with_field(FieldSpec::required("timestamp", FieldKind::Int))
            .with_field(FieldSpec::required("value", FieldKind::Double))
            .with_primary_key("_id")
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_record() {
        let r = record(json!({
            "_id": new_object_id(),
            "sensorId": "sensor-1",
            "timestamp": 1_700_000_000_000i64,
            "value": 21.5,
        }));
        sensor_schema().validate(&r).unwrap();
    }

    #[test]
    fn test_int_accepted_as_double() {
        let r = record(json!({
            "_id": new_object_id(),
            "sensorId": "s",
            "sensorType": null,
            "timestamp": 1,
            "value": 21,
        }));
        sensor_schema().validate(&r).unwrap();
    }

    #[test]
    fn test_missing_required_field() {
        let r = record(json!({ "_id": new_object_id(), "sensorId": "s", "timestamp": 1 }));
        let err = sensor_schema().validate(&r).unwrap_err();
        assert!(err.to_string().contains("value"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let r = record(json!({
            "_id": new_object_id(),
            "sensorId": "s",
            "timestamp": 1,
            "value": 1.0,
            "extra": true,
        }));
        assert!(sensor_schema().validate(&r).is_err());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let r = record(json!({
            "_id": "not-an-object-id",
            "sensorId": "s",
            "timestamp": 1,
            "value": 1.0,
        }));
        assert!(sensor_schema().validate(&r).is_err());
    }

    #[test]
    fn test_named_schema_accepts_anything() {
        let r = record(json!({ "anything": [1, 2, 3] }));
        Schema::named("raw").validate(&r).unwrap();
    }

    #[test]
    fn test_blank_name_rejected() {
        assert!(Schema::named("sensorData").check_name().is_ok());
        assert!(matches!(
            Schema::named("").check_name(),
            Err(StorageError::SchemaViolation(_))
        ));
        assert!(Schema::named("  ").check_name().is_err());
    }

    #[test]
    fn test_object_id_shape() {
        let id = new_object_id();
        assert!(is_object_id(&id));
        assert_ne!(id, new_object_id());
    }
}
