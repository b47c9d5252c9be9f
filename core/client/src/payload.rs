//! Wire format of one page.

use serde::Serialize;
use serde_json::Value;

use stationsync_common::{json_kind, Error, Result, Row};

/// A validated page body: `{ results, count, next, previous }`.
#[derive(Debug, Clone, Serialize)]
pub struct PagePayload {
    pub results: Vec<Row>,
    pub count: Option<u64>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl PagePayload {
    /// Parse and validate a response body.
    ///
    /// # Errors
    /// - `MalformedResponse` when the body is not JSON, is not an object,
    ///   lacks a `results` array, or a result is not an object
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedResponse(format!("body is not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed body.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(Error::MalformedResponse(format!(
                    "expected an object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let results = match object.remove("results") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(Row::from_value)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::MalformedResponse(format!(
                    "'results' must be an array, got {}",
                    json_kind(&other)
                )))
            }
            None => {
                let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
                keys.sort_unstable();
                return Err(Error::MalformedResponse(format!(
                    "missing 'results' array (keys: [{}])",
                    keys.join(", ")
                )));
            }
        };

        Ok(Self {
            results,
            count: object.get("count").and_then(Value::as_u64),
            next: object.get("next").and_then(Value::as_str).map(String::from),
            previous: object.get("previous").and_then(Value::as_str).map(String::from),
        })
    }
}

/// Pull a human-readable message out of an error body.
///
/// Looks at `error` then `detail`; falls back to the raw text.
pub fn error_message(body: &[u8]) -> String {
    if let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(body) {
        for field in ["error", "detail"] {
            match object.get(field) {
                Some(Value::String(message)) => return message.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "no response body".to_string()
    } else {
        text.chars().take(200).collect()
    }
}
