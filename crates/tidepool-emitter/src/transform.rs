//! Payload transforms
//!
//! A [`Transform`] maps the raw payload of a message to the record persisted
//! for it. Transforms are pure and run on the flush path, never on emit.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;
use tidepool_storage::{new_object_id, FieldKind, Record};

/// Errors produced while transforming a payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing field '{0}'")]
    MissingField(String),

    #[error("Field '{field}' cannot be read as {kind:?}")]
    Cast { field: String, kind: FieldKind },

    #[error("{0}")]
    Custom(String),
}

/// Maps a message payload to a persisted record
pub trait Transform: Send + Sync {
    fn apply(&self, payload: &[u8]) -> Result<Record, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&[u8]) -> Result<Record, TransformError> + Send + Sync,
{
    fn apply(&self, payload: &[u8]) -> Result<Record, TransformError> {
        self(payload)
    }
}

fn parse_object(payload: &[u8]) -> Result<Record, TransformError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(TransformError::NotAnObject),
        Err(e) => Err(TransformError::InvalidJson(e.to_string())),
    }
}

/// Persists the payload as-is; it must be a JSON object
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTransform;

impl Transform for JsonTransform {
    fn apply(&self, payload: &[u8]) -> Result<Record, TransformError> {
        parse_object(payload)
    }
}

/// One field picked from the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Key in the payload object
    pub source: String,
    /// Key in the record; defaults to `source`
    #[serde(default)]
    pub target: Option<String>,
    /// Type the value is cast to
    pub kind: FieldKind,
    /// Skip instead of failing when the source key is absent or null
    #[serde(default)]
    pub optional: bool,
}

impl FieldMapping {
    fn target_name(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }
}

/// Picks, renames and casts fields of a JSON payload into a record
///
/// Fields not listed are dropped. With [`with_object_id`](Self::with_object_id)
/// a fresh object id is minted into the named field of every record.
///
/// ```
/// use tidepool_emitter::{FieldMapTransform, Transform};
/// use tidepool_storage::FieldKind;
///
/// let transform = FieldMapTransform::new()
///     .with_object_id("_id")
///     .map("sensorId", FieldKind::String)
///     .rename("tempCelsius", "value", FieldKind::Double);
///
/// let record = transform
///     .apply(br#"{"sensorId": 7, "tempCelsius": "21.5"}"#)
///     .unwrap();
/// assert_eq!(record["sensorId"], "7");
/// assert_eq!(record["value"], 21.5);
/// assert!(record.contains_key("_id"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapTransform {
    /// Field receiving a freshly minted object id
    #[serde(default)]
    pub object_id: Option<String>,
    /// Fields copied from the payload
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

impl FieldMapTransform {
    /// Create a transform with no fields
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an object id into `field`
    pub fn with_object_id(mut self, field: impl Into<String>) -> Self {
        self.object_id = Some(field.into());
        self
    }

    /// Copy a required field under the same name
    pub fn map(self, source: impl Into<String>, kind: FieldKind) -> Self {
        self.with_mapping(source, None, kind, false)
    }

    /// Copy a required field under a new name
    pub fn rename(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.with_mapping(source, Some(target.into()), kind, false)
    }

    /// Copy an optional field under the same name
    pub fn map_optional(self, source: impl Into<String>, kind: FieldKind) -> Self {
        self.with_mapping(source, None, kind, true)
    }

    fn with_mapping(
        mut self,
        source: impl Into<String>,
        target: Option<String>,
        kind: FieldKind,
        optional: bool,
    ) -> Self {
        self.fields.push(FieldMapping {
            source: source.into(),
            target,
            kind,
            optional,
        });
        self
    }
}

impl Transform for FieldMapTransform {
    fn apply(&self, payload: &[u8]) -> Result<Record, TransformError> {
        let input = parse_object(payload)?;
        let mut record = Record::new();

        if let Some(field) = &self.object_id {
            record.insert(field.clone(), Value::String(new_object_id()));
        }

        for mapping in &self.fields {
            match input.get(&mapping.source) {
                None | Some(Value::Null) if mapping.optional => {}
                None | Some(Value::Null) => {
                    return Err(TransformError::MissingField(mapping.source.clone()));
                }
                Some(value) => {
                    let cast = cast(value, mapping.kind).ok_or_else(|| TransformError::Cast {
                        field: mapping.source.clone(),
                        kind: mapping.kind,
                    })?;
                    record.insert(mapping.target_name().to_string(), cast);
                }
            }
        }

        Ok(record)
    }
}

/// Cast a JSON value, accepting numbers and booleans encoded as strings
fn cast(value: &Value, kind: FieldKind) -> Option<Value> {
    match kind {
        FieldKind::String => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldKind::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Number(n.clone())),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::from(f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldKind::Double => {
            let f = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }?;
            Number::from_f64(f).map(Value::Number)
        }
        FieldKind::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) => s.trim().parse::<bool>().ok().map(Value::Bool),
            _ => None,
        },
        FieldKind::ObjectId => value
            .as_str()
            .filter(|s| s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit()))
            .map(|s| Value::String(s.to_string())),
        FieldKind::Json => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temperature() -> FieldMapTransform {
        FieldMapTransform::new()
            .with_object_id("_id")
            .map("sensorType", FieldKind::String)
            .map("sensorId", FieldKind::String)
            .rename("tempCelsius", "value", FieldKind::Double)
            .map("timestamp", FieldKind::Int)
    }

    #[test]
    fn test_json_transform() {
        let record = JsonTransform.apply(br#"{"a": 1, "b": "x"}"#).unwrap();
        assert_eq!(record["a"], 1);
        assert_eq!(record["b"], "x");
    }

    #[test]
    fn test_json_transform_rejects_non_objects() {
        assert_eq!(JsonTransform.apply(b"[1, 2]"), Err(TransformError::NotAnObject));
        assert!(matches!(
            JsonTransform.apply(b"not json"),
            Err(TransformError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_closure_transform() {
        let transform = |payload: &[u8]| -> Result<Record, TransformError> {
            let mut record = Record::new();
            record.insert("len".to_string(), json!(payload.len()));
            Ok(record)
        };
        assert_eq!(transform.apply(b"abc").unwrap()["len"], 3);
    }

    #[test]
    fn test_sensor_reading() {
        let payload = json!({
            "sensorType": "temperature",
            "sensorId": "sensor-1",
            "tempCelsius": 23.5,
            "timestamp": 1_700_000_000_000i64,
            "firmware": "1.2.0",
        });
        let record = temperature()
            .apply(payload.to_string().as_bytes())
            .unwrap();

        assert_eq!(record["sensorId"], "sensor-1");
        assert_eq!(record["value"], 23.5);
        assert_eq!(record["timestamp"], 1_700_000_000_000i64);
        assert!(!record.contains_key("firmware"));
        assert!(!record.contains_key("tempCelsius"));
        assert_eq!(record["_id"].as_str().unwrap().len(), 24);
    }

    #[test]
    fn test_string_encoded_numbers() {
        let payload =
            br#"{"sensorType": "t", "sensorId": 3, "tempCelsius": "19", "timestamp": "42"}"#;
        let record = temperature().apply(payload).unwrap();
        assert_eq!(record["sensorId"], "3");
        assert_eq!(record["value"], 19.0);
        assert_eq!(record["timestamp"], 42);
    }

    #[test]
    fn test_missing_and_optional_fields() {
        let transform = FieldMapTransform::new()
            .map("a", FieldKind::Int)
            .map_optional("b", FieldKind::Bool);

        let record = transform.apply(br#"{"a": 1, "b": null}"#).unwrap();
        assert!(!record.contains_key("b"));

        assert_eq!(
            transform.apply(br#"{"b": true}"#),
            Err(TransformError::MissingField("a".to_string()))
        );
    }

    #[test]
    fn test_uncastable_value() {
        let transform = FieldMapTransform::new().map("a", FieldKind::Int);
        assert!(matches!(
            transform.apply(br#"{"a": "twelve"}"#),
            Err(TransformError::Cast { .. })
        ));
        assert!(matches!(
            transform.apply(br#"{"a": 1.5}"#),
            Err(TransformError::Cast { .. })
        ));
    }

    #[test]
    fn test_deserialize_from_config() {
        let transform: FieldMapTransform = serde_json::from_value(json!({
            "object_id": "_id",
            "fields": [
                { "source": "relHumidity", "target": "value", "kind": "double" },
                { "source": "sensorId", "kind": "string" },
            ],
        }))
        .unwrap();
        assert_eq!(transform.fields.len(), 2);
        assert_eq!(transform.fields[0].target_name(), "value");
        assert_eq!(transform.fields[1].target_name(), "sensorId");
    }
}
