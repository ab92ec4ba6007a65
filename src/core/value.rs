//! # Media-Typed Values
//!
//! An [`MTValue`] is what a scope lookup produces before type resolution: a raw
//! value plus a marker of its encoding. Resolvers pick their conversion path from
//! the media type, e.g. a body tagged `application/json` is parsed as JSON while a
//! body tagged `application/x-www-form-urlencoded` is parsed as a query string.

use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Media type of a looked-up value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    /// A single text value
    Text,
    /// A number
    Number,
    /// Any structured value
    Object,
    /// A list of text values
    TextList,
    /// A list of structured values
    ObjectList,
    /// A string-keyed map of structured values
    ObjectMap,
    /// A string-keyed map of text lists (query, form, header maps)
    TextListMap,
    /// Raw bytes tagged with a MIME type, e.g. a request body
    Mime(String),
}

impl MediaType {
    /// Whether this is a MIME type containing the given fragment
    pub fn contains(&self, fragment: &str) -> bool {
        match self {
            MediaType::Mime(mime) => mime.to_ascii_lowercase().contains(fragment),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MediaType::Text => "text",
            MediaType::Number => "number",
            MediaType::Object => "object",
            MediaType::TextList => "[]text",
            MediaType::ObjectList => "[]object",
            MediaType::ObjectMap => "map[text]object",
            MediaType::TextListMap => "map[text][]text",
            MediaType::Mime(mime) => mime.as_str(),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw payload of an [`MTValue`]
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Value(Value),
    Bytes(Bytes),
}

/// A media-typed value with a validity marker
#[derive(Debug, Clone, PartialEq)]
pub struct MTValue {
    valid: bool,
    pub media_type: MediaType,
    pub payload: Payload,
}

impl MTValue {
    /// The explicit "not found" marker. Not an error.
    pub fn invalid() -> Self {
        Self {
            valid: false,
            media_type: MediaType::Object,
            payload: Payload::Value(Value::Null),
        }
    }

    /// A text value; valid only when non-empty
    pub fn text<S: Into<String>>(text: S) -> Self {
        let text = text.into();
        Self {
            valid: !text.is_empty(),
            media_type: MediaType::Text,
            payload: Payload::Value(Value::String(text)),
        }
    }

    pub fn number(value: Value) -> Self {
        Self {
            valid: value.is_number(),
            media_type: MediaType::Number,
            payload: Payload::Value(value),
        }
    }

    pub fn object(value: Value) -> Self {
        Self {
            valid: !value.is_null(),
            media_type: MediaType::Object,
            payload: Payload::Value(value),
        }
    }

    pub fn text_list(values: Vec<String>) -> Self {
        Self {
            valid: !values.is_empty(),
            media_type: MediaType::TextList,
            payload: Payload::Value(Value::Array(values.into_iter().map(Value::String).collect())),
        }
    }

    pub fn object_list(values: Vec<Value>) -> Self {
        Self {
            valid: true,
            media_type: MediaType::ObjectList,
            payload: Payload::Value(Value::Array(values)),
        }
    }

    pub fn object_map(map: Map<String, Value>) -> Self {
        Self {
            valid: true,
            media_type: MediaType::ObjectMap,
            payload: Payload::Value(Value::Object(map)),
        }
    }

    pub fn text_list_map(map: HashMap<String, Vec<String>>) -> Self {
        let object = map
            .into_iter()
            .map(|(k, vs)| (k, Value::Array(vs.into_iter().map(Value::String).collect())))
            .collect();
        Self {
            valid: true,
            media_type: MediaType::TextListMap,
            payload: Payload::Value(Value::Object(object)),
        }
    }

    /// Raw bytes tagged with a MIME type
    pub fn body<M: Into<String>>(bytes: Bytes, mime: M) -> Self {
        Self {
            valid: true,
            media_type: MediaType::Mime(mime.into()),
            payload: Payload::Bytes(bytes),
        }
    }

    /// Wrap an arbitrary JSON value, choosing the media type from its shape
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self::text(s),
            Value::Number(_) => Self::number(value),
            Value::Array(items) => {
                if items.iter().all(Value::is_string) {
                    let texts = items
                        .into_iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect();
                    Self::text_list(texts)
                } else {
                    Self::object_list(items)
                }
            }
            Value::Object(map) => Self::object_map(map),
            other => Self::object(other),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The structured payload, if this is not a byte payload
    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Value(v) => Some(v),
            Payload::Bytes(_) => None,
        }
    }

    /// The byte payload, if any
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Bytes(b) => Some(b),
            Payload::Value(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_validity() {
        assert!(MTValue::text("bob").is_valid());
        assert!(!MTValue::text("").is_valid());
        assert!(!MTValue::invalid().is_valid());
    }

    #[test]
    fn test_from_value_shapes() {
        assert_eq!(MTValue::from_value(json!(["a", "b"])).media_type, MediaType::TextList);
        assert_eq!(MTValue::from_value(json!([1, "b"])).media_type, MediaType::ObjectList);
        assert_eq!(MTValue::from_value(json!({"k": 1})).media_type, MediaType::ObjectMap);
        assert_eq!(MTValue::from_value(json!(12)).media_type, MediaType::Number);
        assert!(!MTValue::from_value(Value::Null).is_valid());
    }

    #[test]
    fn test_mime_contains_is_case_insensitive() {
        let v = MTValue::body(Bytes::from_static(b"{}"), "Application/JSON; charset=utf-8");
        assert!(v.media_type.contains("application/json"));
        assert!(!MediaType::Text.contains("json"));
    }
}
