//! Queue entries and the task descriptors decoded from them.
//!
//! A queue entry is the JSON envelope the broker stores in the queue list:
//!
//! ```text
//! {
//!   "body": "<base64 payload>",
//!   "content-type": "application/json",
//!   "headers": {"compression": "application/x-gzip"},
//!   "properties": {...}
//! }
//! ```
//!
//! [`extract_body`] turns the envelope into a [`TaskBody`]: the payload is
//! base64-decoded, inflated when the compression marker says so, then parsed
//! according to its content type.

pub mod decoder;
pub mod legacy;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::DecodeError;

pub use decoder::extract_body;

/// Content type of JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type of legacy pickled payloads.
pub const CONTENT_TYPE_LEGACY: &str = "application/x-python-serialize";

/// Header value marking a zlib-compressed payload.
pub const COMPRESSION_GZIP: &str = "application/x-gzip";

/// Sentinel rendered for descriptor fields absent from the payload.
pub const KEY_MISSING: &str = "Key missing";

/// Serialization format declared by an entry's `content-type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Legacy,
    Unknown(Option<String>),
}

impl ContentType {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(CONTENT_TYPE_JSON) => ContentType::Json,
            Some(CONTENT_TYPE_LEGACY) => ContentType::Legacy,
            other => ContentType::Unknown(other.map(str::to_string)),
        }
    }
}

/// Compression declared by an entry's `headers.compression`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

/// One message as stored in the queue list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueEntry {
    /// Echoed verbatim as the correlation id.
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: Option<Value>,
    #[serde(rename = "content-type", default)]
    pub content_type: Option<Value>,
}

impl QueueEntry {
    /// Parses a raw list element.
    pub fn from_slice(raw: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw).map_err(|e| DecodeError::InvalidEntry(e.to_string()))
    }

    /// The correlation value, untouched.
    pub fn correlation_id(&self) -> &Value {
        &self.properties
    }

    pub fn content_type(&self) -> ContentType {
        ContentType::parse(self.content_type.as_ref().and_then(Value::as_str))
    }

    pub fn compression(&self) -> Compression {
        let marker = self
            .headers
            .as_ref()
            .and_then(|headers| headers.get("compression"))
            .and_then(Value::as_str);
        match marker {
            Some(COMPRESSION_GZIP) => Compression::Gzip,
            _ => Compression::None,
        }
    }
}

/// A decoded task payload.
///
/// Recognized formats yield the parsed payload; unknown formats yield an
/// empty mapping. Field lookups only succeed on mappings.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskBody(Value);

impl Default for TaskBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl TaskBody {
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_object().and_then(|map| map.get(key))
    }

    /// Task name.
    pub fn task(&self) -> Option<&Value> {
        self.get("task")
    }

    /// Positional arguments.
    pub fn args(&self) -> Option<&Value> {
        self.get("args")
    }

    /// Keyword arguments.
    pub fn kwargs(&self) -> Option<&Value> {
        self.get("kwargs")
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Pretty-printed payload for the raw dump after the report.
    pub fn to_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

/// Renders a payload value for the text report: strings bare, everything
/// else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_type_parse() {
        assert_eq!(ContentType::parse(Some("application/json")), ContentType::Json);
        assert_eq!(
            ContentType::parse(Some("application/x-python-serialize")),
            ContentType::Legacy
        );
        assert_eq!(
            ContentType::parse(Some("application/x-yaml")),
            ContentType::Unknown(Some("application/x-yaml".to_string()))
        );
        assert_eq!(ContentType::parse(None), ContentType::Unknown(None));
    }

    #[test]
    fn test_compression_requires_exact_marker() {
        let entry = QueueEntry {
            headers: Some(json!({"compression": "application/x-gzip"})),
            ..Default::default()
        };
        assert_eq!(entry.compression(), Compression::Gzip);

        let entry = QueueEntry {
            headers: Some(json!({"compression": "gzip"})),
            ..Default::default()
        };
        assert_eq!(entry.compression(), Compression::None);

        let entry = QueueEntry {
            headers: Some(json!("not a mapping")),
            ..Default::default()
        };
        assert_eq!(entry.compression(), Compression::None);
    }

    #[test]
    fn test_entry_parse_keeps_properties_verbatim() {
        let raw = br#"{"properties": {"correlation_id": "abc"}, "body": "e30=", "content-type": "application/json"}"#;
        let entry = QueueEntry::from_slice(raw).expect("entry should parse");
        assert_eq!(entry.correlation_id(), &json!({"correlation_id": "abc"}));
        assert_eq!(entry.content_type(), ContentType::Json);
    }

    #[test]
    fn test_entry_parse_rejects_garbage() {
        assert!(matches!(
            QueueEntry::from_slice(b"not json"),
            Err(DecodeError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_task_body_fields() {
        let body = TaskBody::from_value(json!({"task": "ship_order", "args": [42]}));
        assert_eq!(body.task(), Some(&json!("ship_order")));
        assert_eq!(body.args(), Some(&json!([42])));
        assert_eq!(body.kwargs(), None);

        let list_body = TaskBody::from_value(json!([[1], {}, {}]));
        assert_eq!(list_body.task(), None);
        assert!(TaskBody::empty().is_empty());
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("ship_order")), "ship_order");
        assert_eq!(display_value(&json!([42])), "[42]");
        assert_eq!(display_value(&json!({})), "{}");
    }
}
