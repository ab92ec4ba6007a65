//! # Core Types
//!
//! Routing metadata shared by every layer of the gateway:
//!
//! - [`Argument`]: one backend call parameter, possibly a nested object
//! - [`Service`]: a backend RPC target (interface, method, protocol, arguments)
//! - [`Endpoint`]: one versioned HTTP method+pattern to [`Service`] binding
//!
//! These types are plain data. They are decoded from discovery documents (JSON or YAML)
//! and cloned freely: the routing table hands out owned copies on every lookup.
//!
//! ## Rust Concepts Used
//! - `serde` derive with `rename_all = "camelCase"` to match the discovery wire format
//! - `#[serde(other)]` to keep unknown argument kinds decodable
//! - `#[serde(skip)]` for per-request state that never crosses the wire

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::value::MTValue;

/// Backend protocols known to the gateway
pub mod protocols {
    pub const DUBBO: &str = "DUBBO";
    pub const HTTP: &str = "HTTP";
    pub const ECHO: &str = "ECHO";
    pub const INAPP: &str = "INAPP";
}

/// Endpoint annotation keys
pub mod endpoint_annotations {
    /// Service ids used to verify access to the endpoint
    pub const PERMISSIONS: &str = "gateway/permissions";
    /// Business key of the endpoint
    pub const BIZ_KEY: &str = "gateway/biz.key";
    /// Whether the endpoint requires authorization
    pub const AUTHORIZE: &str = "gateway/authorize";
    /// Id of the listener the endpoint binds to
    pub const LISTENER_SELECTOR: &str = "gateway/listener.selector";
    /// Marks a fixed endpoint whose service is never synced from the registry
    pub const STATIC_MODEL: &str = "gateway/static.model";
}

/// Service annotation keys
pub mod service_annotations {
    pub const RPC_GROUP: &str = "gateway/rpc.group";
    pub const RPC_VERSION: &str = "gateway/rpc.version";
    pub const RPC_TIMEOUT: &str = "gateway/rpc.timeout";
    pub const RPC_RETRIES: &str = "gateway/rpc.retries";
}

/// Argument annotation holding the default value
pub const ARGUMENT_ANNOTATION_DEFAULT: &str = "default";

/// A name/value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NamedValue {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl NamedValue {
    pub fn new<S: Into<String>>(name: S, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// The value as text. For a list, the first element is used.
    pub fn get_string(&self) -> String {
        match &self.value {
            Value::Array(items) => items.first().map(value_to_string).unwrap_or_default(),
            other => value_to_string(other),
        }
    }

    /// The value as a list of texts
    pub fn get_strings(&self) -> Vec<String> {
        match &self.value {
            Value::Array(items) => items.iter().map(value_to_string).collect(),
            Value::Null => Vec::new(),
            Value::String(s) if s.contains(',') => {
                s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
            }
            other => vec![value_to_string(other)],
        }
    }

    pub fn get_bool(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "t" | "yes"),
            _ => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.value.is_null()
    }
}

/// Render a JSON value as plain text; strings are not quoted
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Fixed declarations attached to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Annotations(pub HashMap<String, Value>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Get an annotation; a missing one yields an empty value
    pub fn get(&self, name: &str) -> NamedValue {
        self.get_ex(name).unwrap_or_default()
    }

    pub fn get_ex(&self, name: &str) -> Option<NamedValue> {
        self.0.get(name).map(|v| NamedValue::new(name, v.clone()))
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, value: Value) {
        self.0.insert(name.into(), value);
    }
}

/// Endpoint attributes. Names are matched case-insensitively and may repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Attributes(pub Vec<NamedValue>);

impl Attributes {
    pub fn single(&self, name: &str) -> Option<&NamedValue> {
        self.0.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn multiple(&self, name: &str) -> Vec<&NamedValue> {
        self.0.iter().filter(|a| a.name.eq_ignore_ascii_case(name)).collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.single(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedValue> {
        self.0.iter()
    }
}

/// Kind of an argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArgumentKind {
    /// A scalar, list or map looked up from one scope
    #[default]
    Primitive,
    /// A nested object assembled from its fields
    Complex,
    /// Any other declared kind; cannot be resolved
    #[serde(other)]
    Unknown,
}

/// One backend call parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ArgumentKind,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub generic: Vec<String>,
    #[serde(default)]
    pub http_name: String,
    #[serde(default)]
    pub http_scope: String,
    #[serde(default)]
    pub fields: Vec<Argument>,
    #[serde(default)]
    pub annotations: Annotations,
    /// Precomputed value that bypasses scope lookup. Set on per-request copies only.
    #[serde(skip)]
    pub preset: Option<MTValue>,
}

impl Argument {
    /// Build a primitive argument looked up as `scope:http_name`
    pub fn primitive<N, C, S>(name: N, class: C, scope: S) -> Self
    where
        N: Into<String>,
        C: Into<String>,
        S: Into<String>,
    {
        let name = name.into();
        Self {
            http_name: name.clone(),
            name,
            kind: ArgumentKind::Primitive,
            class: class.into(),
            http_scope: scope.into(),
            ..Default::default()
        }
    }

    /// Build a complex argument from its fields
    pub fn complex<N: Into<String>, C: Into<String>>(name: N, class: C, fields: Vec<Argument>) -> Self {
        let name = name.into();
        Self {
            http_name: name.clone(),
            name,
            kind: ArgumentKind::Complex,
            class: class.into(),
            fields,
            ..Default::default()
        }
    }

    pub fn with_generic<S: Into<String>>(mut self, generic: S) -> Self {
        self.generic.push(generic.into());
        self
    }

    pub fn with_http_name<S: Into<String>>(mut self, http_name: S) -> Self {
        self.http_name = http_name.into();
        self
    }

    pub fn with_default<S: Into<String>>(mut self, default: S) -> Self {
        self.annotations
            .insert(ARGUMENT_ANNOTATION_DEFAULT, Value::String(default.into()));
        self
    }

    pub fn with_preset(mut self, value: MTValue) -> Self {
        self.preset = Some(value);
        self
    }
}

/// A backend RPC target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub alias_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Service {
    pub fn new<P, I, M>(protocol: P, interface: I, method: M) -> Self
    where
        P: Into<String>,
        I: Into<String>,
        M: Into<String>,
    {
        Self {
            protocol: protocol.into(),
            interface: interface.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    /// `interface:method`, or empty when either part is missing
    pub fn service_id(&self) -> String {
        if self.interface.is_empty() || self.method.is_empty() {
            return String::new();
        }
        format!("{}:{}", self.interface, self.method)
    }

    /// Interface, method and protocol are all required
    pub fn is_valid(&self) -> bool {
        !self.interface.is_empty() && !self.method.is_empty() && !self.protocol.is_empty()
    }

    pub fn annotation(&self, name: &str) -> NamedValue {
        self.annotations.get(name)
    }
}

/// One versioned HTTP to backend binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub http_pattern: String,
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub service: Service,
}

impl Endpoint {
    /// Method and pattern are required, and the backend must be identifiable
    /// either by `serviceId` or by an embedded valid service.
    pub fn is_valid(&self) -> bool {
        !self.http_method.is_empty()
            && !self.http_pattern.is_empty()
            && (!self.service_id.is_empty() || self.service.is_valid())
    }

    pub fn attribute(&self, name: &str) -> Option<&NamedValue> {
        self.attributes.single(name)
    }

    pub fn annotation(&self, name: &str) -> NamedValue {
        self.annotations.get(name)
    }

    /// The listener id this endpoint binds to
    pub fn listener_id(&self) -> String {
        let selected = self.annotation(endpoint_annotations::LISTENER_SELECTOR).get_string();
        if selected.is_empty() {
            "default".to_string()
        } else {
            selected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_identity() {
        let service = Service::new("DUBBO", "com.demo.UserService", "get");
        assert_eq!(service.service_id(), "com.demo.UserService:get");
        assert!(service.is_valid());
        assert_eq!(Service::new("DUBBO", "", "get").service_id(), "");
        assert!(!Service::new("", "a", "b").is_valid());
    }

    #[test]
    fn test_endpoint_decode_and_validity() {
        let endpoint: Endpoint = serde_json::from_value(json!({
            "application": "demo",
            "version": "1.0",
            "httpPattern": "/users/:id",
            "httpMethod": "GET",
            "serviceId": "com.demo.UserService:get",
            "attributes": [{"name": "Authorize", "value": true}],
            "annotations": {"gateway/listener.selector": "admin"}
        }))
        .unwrap();
        assert!(endpoint.is_valid());
        assert!(endpoint.attribute("authorize").unwrap().get_bool());
        assert_eq!(endpoint.listener_id(), "admin");
        assert!(!Endpoint::default().is_valid());
    }

    #[test]
    fn test_argument_kind_decoding() {
        let arg: Argument = serde_json::from_value(json!({
            "name": "pojo", "type": "COMPLEX", "class": "X",
            "fields": [{"name": "year", "type": "PRIMITIVE", "class": "int", "httpScope": "QUERY", "httpName": "year"}]
        }))
        .unwrap();
        assert_eq!(arg.kind, ArgumentKind::Complex);
        assert_eq!(arg.fields[0].kind, ArgumentKind::Primitive);

        let unknown: Argument = serde_json::from_value(json!({"name": "x", "type": "ENUM"})).unwrap();
        assert_eq!(unknown.kind, ArgumentKind::Unknown);
    }

    #[test]
    fn test_named_value_accessors() {
        assert_eq!(NamedValue::new("a", json!(["x", "y"])).get_string(), "x");
        assert_eq!(NamedValue::new("a", json!("p1, p2")).get_strings(), vec!["p1", "p2"]);
        assert_eq!(NamedValue::new("a", json!(3)).get_string(), "3");
        assert!(NamedValue::new("a", json!("true")).get_bool());
        assert!(!NamedValue::default().is_valid());
    }
}
