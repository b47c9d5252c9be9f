//! Common types used throughout the sync stack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use zeroize::Zeroize;

/// One remote record.
///
/// Rows are passed through untouched; only the `id` field is ever inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    /// Wrap a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Convert an arbitrary JSON value into a row.
    ///
    /// # Errors
    /// - Returns error if the value is not a JSON object
    pub fn from_value(value: Value) -> crate::Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(crate::Error::MalformedResponse(format!(
                "row must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// The row identity, if present.
    pub fn id(&self) -> Option<&Value> {
        self.0.get("id")
    }

    /// Look up a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// All fields of the row.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into the underlying JSON object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Short name of a JSON value's type, for diagnostics.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// API credential that zeroizes on drop and never prints.
#[derive(Clone, Default, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Create a credential from its secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the secret for building a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_from_object() {
        let row = Row::from_value(json!({"id": 7, "name": "Central"})).unwrap();
        assert_eq!(row.id(), Some(&json!(7)));
        assert_eq!(row.get("name"), Some(&json!("Central")));
    }

    #[test]
    fn test_row_rejects_non_object() {
        let err = Row::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_row_serializes_transparently() {
        let row = Row::from_value(json!({"id": 1})).unwrap();
        assert_eq!(serde_json::to_value(&row).unwrap(), json!({"id": 1}));
    }

    #[test]
    fn test_credential_is_redacted() {
        let credential = Credential::new("s3cret");
        assert_eq!(format!("{:?}", credential), "Credential([REDACTED])");
        assert_eq!(credential.expose(), "s3cret");
    }
}
