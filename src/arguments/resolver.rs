//! # Value Resolvers
//!
//! A [`ValueResolver`] converts one looked-up [`MTValue`] into the JSON value
//! sent to the backend for a declared class. The [`ResolverRegistry`] maps class
//! names (case-insensitive) to resolvers and falls back to the `default` resolver
//! for unknown classes.
//!
//! Builtin classes:
//!
//! | Classes | Result |
//! |---------|--------|
//! | `string`, `java.lang.String` | text |
//! | `int`, `java.lang.Integer` | 32-bit integer |
//! | `long`, `int64`, `java.lang.Long` | 64-bit integer |
//! | `float`, `float32`, `java.lang.Float` | 32-bit float |
//! | `double`, `float64`, `java.lang.Double` | 64-bit float |
//! | `bool`, `boolean`, `java.lang.Boolean` | boolean |
//! | `list`, `slice`, `java.util.List` | array, elements resolved with `generic[0]` |
//! | `map`, `java.util.Map` | string-keyed object |
//! | `java.io.Serializable`, `java.lang.Object` | passthrough |
//! | anything else | object with a `"class"` entry |
//!
//! Missing (invalid) values resolve to the zero value of the class; only values
//! that cannot be converted fail.

use bytes::Bytes;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::web::FORM_URLENCODED;
use crate::core::error::{ResolveError, ResolveResult};
use crate::core::value::{MTValue, MediaType, Payload};

/// Well-known class names
pub mod classes {
    pub const STRING: &str = "java.lang.String";
    pub const INTEGER: &str = "java.lang.Integer";
    pub const LONG: &str = "java.lang.Long";
    pub const FLOAT: &str = "java.lang.Float";
    pub const DOUBLE: &str = "java.lang.Double";
    pub const BOOLEAN: &str = "java.lang.Boolean";
    pub const LIST: &str = "java.util.List";
    pub const MAP: &str = "java.util.Map";
    pub const SERIALIZABLE: &str = "java.io.Serializable";
    pub const OBJECT: &str = "java.lang.Object";
    pub const DEFAULT: &str = "default";
}

/// Entry added to resolved objects to carry their declared class
pub const CLASS_KEY: &str = "class";

/// Converts a raw value into the value of a declared class
pub trait ValueResolver: Send + Sync {
    fn resolve(
        &self,
        value: &MTValue,
        class: &str,
        generic: &[String],
        registry: &ResolverRegistry,
    ) -> ResolveResult<Value>;
}

impl<F> ValueResolver for F
where
    F: Fn(&MTValue, &str, &[String], &ResolverRegistry) -> ResolveResult<Value> + Send + Sync,
{
    fn resolve(
        &self,
        value: &MTValue,
        class: &str,
        generic: &[String],
        registry: &ResolverRegistry,
    ) -> ResolveResult<Value> {
        self(value, class, generic, registry)
    }
}

/// Class name to resolver table
#[derive(Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn ValueResolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<&String> = self.resolvers.keys().collect();
        classes.sort();
        f.debug_struct("ResolverRegistry").field("classes", &classes).finish()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ResolverRegistry {
    /// An empty registry without any resolver
    pub fn empty() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// A registry holding every builtin resolver
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_all(&["string", classes::STRING], resolve_string);
        registry.register_all(&["int", classes::INTEGER], resolve_int);
        registry.register_all(&["long", "int64", classes::LONG], resolve_long);
        registry.register_all(&["float", "float32", classes::FLOAT], resolve_float);
        registry.register_all(&["double", "float64", classes::DOUBLE], resolve_double);
        registry.register_all(&["bool", "boolean", classes::BOOLEAN], resolve_bool);
        registry.register_all(&["list", "slice", classes::LIST], resolve_list);
        registry.register_all(&["map", classes::MAP], resolve_map);
        registry.register_all(&[classes::SERIALIZABLE, classes::OBJECT], resolve_passthrough);
        registry.register(classes::DEFAULT, resolve_default);
        registry
    }

    /// Register a resolver for one class, replacing any previous one
    pub fn register<R: ValueResolver + 'static>(&mut self, class: &str, resolver: R) {
        self.resolvers.insert(class.to_ascii_lowercase(), Arc::new(resolver));
    }

    fn register_all<R: ValueResolver + Clone + 'static>(&mut self, names: &[&str], resolver: R) {
        for name in names {
            self.register(name, resolver.clone());
        }
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn ValueResolver>> {
        self.resolvers.get(&class.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.resolvers.contains_key(&class.to_ascii_lowercase())
    }

    /// Resolve with the class's resolver, or the default one
    pub fn resolve(&self, value: &MTValue, class: &str, generic: &[String]) -> ResolveResult<Value> {
        let resolver = self
            .get(class)
            .or_else(|| self.get(classes::DEFAULT))
            .ok_or_else(|| ResolveError::unresolvable(class, "no resolver registered"))?;
        resolver.resolve(value, class, generic, self)
    }
}

/// Plain text of a value; lists and objects are JSON-encoded
fn text_of(value: &MTValue) -> String {
    match &value.payload {
        Payload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Payload::Value(Value::String(s)) => s.clone(),
        Payload::Value(Value::Null) => String::new(),
        Payload::Value(Value::Bool(b)) => b.to_string(),
        Payload::Value(Value::Number(n)) => n.to_string(),
        Payload::Value(other) => other.to_string(),
    }
}

/// Scalar text for numeric and boolean casts. A text list contributes its first element.
fn scalar_text(value: &MTValue, class: &str) -> ResolveResult<String> {
    match &value.payload {
        Payload::Bytes(bytes) => Ok(String::from_utf8_lossy(bytes).trim().to_string()),
        Payload::Value(Value::String(s)) => Ok(s.trim().to_string()),
        Payload::Value(Value::Number(n)) => Ok(n.to_string()),
        Payload::Value(Value::Bool(b)) => Ok(if *b { "1" } else { "0" }.to_string()),
        Payload::Value(Value::Null) => Ok(String::new()),
        Payload::Value(Value::Array(items)) if value.media_type == MediaType::TextList => {
            Ok(items.first().and_then(Value::as_str).unwrap_or_default().trim().to_string())
        }
        Payload::Value(other) => Err(ResolveError::unresolvable(
            class,
            format!("cannot cast {} to a scalar", other),
        )),
    }
}

fn parse_integer(text: &str, class: &str) -> ResolveResult<i64> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => {
            // i64::MAX as f64 is 2^63
            if f < i64::MIN as f64 || f >= i64::MAX as f64 {
                return Err(ResolveError::unresolvable(class, format!("'{}' overflows long", text)));
            }
            Ok(f as i64)
        }
        _ => Err(ResolveError::unresolvable(class, format!("'{}' is not an integer", text))),
    }
}

fn parse_float(text: &str, class: &str) -> ResolveResult<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| ResolveError::unresolvable(class, format!("'{}' is not a number", text)))
}

fn float_value(f: f64, class: &str) -> ResolveResult<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ResolveError::unresolvable(class, format!("{} is not a finite number", f)))
}

pub fn resolve_string(value: &MTValue, _: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    if !value.is_valid() {
        return Ok(Value::String(String::new()));
    }
    Ok(Value::String(text_of(value)))
}

pub fn resolve_int(value: &MTValue, class: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    if !value.is_valid() {
        return Ok(Value::from(0i32));
    }
    let text = scalar_text(value, class)?;
    if text.is_empty() {
        return Ok(Value::from(0i32));
    }
    let i = parse_integer(&text, class)?;
    let i = i32::try_from(i).map_err(|_| ResolveError::unresolvable(class, format!("{} overflows int", i)))?;
    Ok(Value::from(i))
}

pub fn resolve_long(value: &MTValue, class: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    if !value.is_valid() {
        return Ok(Value::from(0i64));
    }
    let text = scalar_text(value, class)?;
    if text.is_empty() {
        return Ok(Value::from(0i64));
    }
    Ok(Value::from(parse_integer(&text, class)?))
}

pub fn resolve_float(value: &MTValue, class: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    if !value.is_valid() {
        return float_value(0.0, class);
    }
    let text = scalar_text(value, class)?;
    if text.is_empty() {
        return float_value(0.0, class);
    }
    let f = parse_float(&text, class)?;
    if f.abs() > f32::MAX as f64 {
        return Err(ResolveError::unresolvable(class, format!("'{}' overflows float", text)));
    }
    float_value(f, class)
}

pub fn resolve_double(value: &MTValue, class: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    if !value.is_valid() {
        return float_value(0.0, class);
    }
    let text = scalar_text(value, class)?;
    if text.is_empty() {
        return float_value(0.0, class);
    }
    float_value(parse_float(&text, class)?, class)
}

pub fn resolve_bool(value: &MTValue, class: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    if !value.is_valid() {
        return Ok(Value::Bool(false));
    }
    let text = scalar_text(value, class)?;
    let b = match text.to_ascii_lowercase().as_str() {
        "" | "0" | "f" | "false" | "no" | "off" => false,
        "1" | "t" | "true" | "yes" | "on" => true,
        other => match other.parse::<f64>() {
            Ok(f) => f != 0.0,
            Err(_) => return Err(ResolveError::unresolvable(class, format!("'{}' is not a boolean", other))),
        },
    };
    Ok(Value::Bool(b))
}

/// Elements of a list source: sequences as-is, JSON bodies parsed, scalars wrapped
fn list_items(value: &MTValue, class: &str) -> ResolveResult<Vec<Value>> {
    match &value.payload {
        Payload::Value(Value::Array(items)) => Ok(items.clone()),
        Payload::Bytes(bytes) if value.media_type.contains("json") => match serde_json::from_slice(bytes) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(other) => Ok(vec![other]),
            Err(e) => Err(ResolveError::unresolvable(class, e)),
        },
        Payload::Bytes(bytes) => Ok(vec![Value::String(String::from_utf8_lossy(bytes).into_owned())]),
        Payload::Value(other) => Ok(vec![other.clone()]),
    }
}

pub fn resolve_list(
    value: &MTValue,
    class: &str,
    generic: &[String],
    registry: &ResolverRegistry,
) -> ResolveResult<Value> {
    if !value.is_valid() {
        return Ok(Value::Array(Vec::new()));
    }
    let items = list_items(value, class)?;
    let Some(element_class) = generic.first() else {
        return Ok(Value::Array(items));
    };
    let resolved = items
        .into_iter()
        .map(|item| registry.resolve(&MTValue::from_value(item), element_class, &[]))
        .collect::<ResolveResult<Vec<Value>>>()?;
    Ok(Value::Array(resolved))
}

fn parse_form(bytes: &[u8]) -> Map<String, Value> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(bytes) {
        grouped.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    collapse(grouped.into_iter().map(|(k, vs)| (k, Value::from(vs))))
}

/// Single-element text lists collapse to their only text
fn collapse<I: IntoIterator<Item = (String, Value)>>(entries: I) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| match v {
            Value::Array(mut items) if items.len() == 1 && items[0].is_string() => (k, items.remove(0)),
            other => (k, other),
        })
        .collect()
}

fn parse_json_map(bytes: &[u8], class: &str) -> ResolveResult<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ResolveError::unresolvable(class, format!("expected a JSON object, got {}", other))),
        Err(e) => Err(ResolveError::unresolvable(class, e)),
    }
}

/// Convert a value into a string-keyed map, choosing the path by media type
pub fn to_string_map(value: &MTValue, class: &str) -> ResolveResult<Map<String, Value>> {
    if !value.is_valid() {
        return Ok(Map::new());
    }
    match (&value.media_type, &value.payload) {
        (MediaType::TextListMap, Payload::Value(Value::Object(map))) => {
            Ok(collapse(map.iter().map(|(k, v)| (k.clone(), v.clone()))))
        }
        (_, Payload::Value(Value::Object(map))) => Ok(map.clone()),
        (MediaType::Text, Payload::Value(Value::String(s))) => parse_json_map(s.as_bytes(), class),
        (media, Payload::Bytes(bytes)) if media.contains("application/json") => parse_json_map(bytes, class),
        (media, Payload::Bytes(bytes)) if media.contains(FORM_URLENCODED) => Ok(parse_form(bytes)),
        (media, _) => Err(ResolveError::unresolvable(
            class,
            format!("unsupported mime-type: {}", media),
        )),
    }
}

pub fn resolve_map(value: &MTValue, class: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    to_string_map(value, class).map(Value::Object)
}

pub fn resolve_passthrough(value: &MTValue, _: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    if !value.is_valid() {
        return Ok(Value::Null);
    }
    Ok(match &value.payload {
        Payload::Value(v) => v.clone(),
        Payload::Bytes(bytes) => body_value(bytes),
    })
}

fn body_value(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Unknown classes become an object carrying its class name
pub fn resolve_default(value: &MTValue, class: &str, _: &[String], _: &ResolverRegistry) -> ResolveResult<Value> {
    let mut map = to_string_map(value, class)?;
    map.insert(CLASS_KEY.to_string(), Value::String(class.to_string()));
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(value: MTValue, class: &str, generic: &[&str]) -> ResolveResult<Value> {
        let generic: Vec<String> = generic.iter().map(|s| s.to_string()).collect();
        ResolverRegistry::with_builtins().resolve(&value, class, &generic)
    }

    #[test]
    fn test_primitive_casts() {
        assert_eq!(resolve(MTValue::text("bob"), "string", &[]).unwrap(), json!("bob"));
        assert_eq!(resolve(MTValue::text("42"), "java.lang.Integer", &[]).unwrap(), json!(42));
        assert_eq!(resolve(MTValue::text(" 7.0 "), "int", &[]).unwrap(), json!(7));
        assert_eq!(resolve(MTValue::text("9000000000"), "long", &[]).unwrap(), json!(9_000_000_000i64));
        assert_eq!(resolve(MTValue::text("1.5"), "double", &[]).unwrap(), json!(1.5));
        assert_eq!(resolve(MTValue::text("0.5"), "float32", &[]).unwrap(), json!(0.5));
        assert_eq!(resolve(MTValue::text("true"), "boolean", &[]).unwrap(), json!(true));
        assert_eq!(resolve(MTValue::number(json!(12)), "string", &[]).unwrap(), json!("12"));
    }

    #[test]
    fn test_float_precision_and_integer_range() {
        assert_eq!(resolve(MTValue::text("0.1"), "float", &[]).unwrap(), json!(0.1));
        assert!(matches!(
            resolve(MTValue::text("1e39"), "java.lang.Float", &[]),
            Err(ResolveError::UnresolvableValue { .. })
        ));
        assert_eq!(resolve(MTValue::text("1e3"), "long", &[]).unwrap(), json!(1000));
        assert!(matches!(
            resolve(MTValue::text("1e30"), "long", &[]),
            Err(ResolveError::UnresolvableValue { .. })
        ));
        assert!(matches!(
            resolve(MTValue::text("-1e19"), "int64", &[]),
            Err(ResolveError::UnresolvableValue { .. })
        ));
    }

    #[test]
    fn test_missing_values_resolve_to_zero() {
        assert_eq!(resolve(MTValue::invalid(), "int", &[]).unwrap(), json!(0));
        assert_eq!(resolve(MTValue::text(""), "string", &[]).unwrap(), json!(""));
        assert_eq!(resolve(MTValue::invalid(), "bool", &[]).unwrap(), json!(false));
        assert_eq!(resolve(MTValue::invalid(), "list", &["int"]).unwrap(), json!([]));
        assert_eq!(resolve(MTValue::invalid(), "map", &[]).unwrap(), json!({}));
    }

    #[test]
    fn test_unconvertible_values_fail() {
        let err = resolve(MTValue::text("abc"), "int", &[]).unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvableValue { .. }));
        assert!(resolve(MTValue::text("3000000000"), "int", &[]).is_err());
        assert!(resolve(MTValue::text("maybe"), "bool", &[]).is_err());
    }

    #[test]
    fn test_list_with_generic() {
        let list = MTValue::text_list(vec!["1".into(), "2".into(), "3".into()]);
        assert_eq!(resolve(list.clone(), "java.util.List", &["int"]).unwrap(), json!([1, 2, 3]));
        assert_eq!(resolve(MTValue::text("5"), "list", &["int"]).unwrap(), json!([5]));
        assert_eq!(resolve(list, "list", &[]).unwrap(), json!(["1", "2", "3"]));
        assert!(resolve(MTValue::text_list(vec!["x".into()]), "list", &["int"]).is_err());
    }

    #[test]
    fn test_map_sources() {
        let json_body = MTValue::body(Bytes::from_static(br#"{"a":1}"#), "application/json");
        assert_eq!(resolve(json_body, "map", &[]).unwrap(), json!({"a": 1}));

        let form = MTValue::body(Bytes::from_static(b"a=1&b=2&b=3"), "application/x-www-form-urlencoded");
        assert_eq!(resolve(form, "map", &[]).unwrap(), json!({"a": "1", "b": ["2", "3"]}));

        let query = MTValue::text_list_map(HashMap::from([("q".to_string(), vec!["x".to_string()])]));
        assert_eq!(resolve(query, "java.util.Map", &[]).unwrap(), json!({"q": "x"}));

        assert_eq!(resolve(MTValue::text(r#"{"k":"v"}"#), "map", &[]).unwrap(), json!({"k": "v"}));

        let xml = MTValue::body(Bytes::from_static(b"<a/>"), "application/xml");
        assert!(resolve(xml, "map", &[]).is_err());
    }

    #[test]
    fn test_default_resolver_adds_class() {
        let value = MTValue::object_map(json!({"name": "x"}).as_object().cloned().unwrap());
        assert_eq!(
            resolve(value, "com.demo.Pojo", &[]).unwrap(),
            json!({"name": "x", "class": "com.demo.Pojo"})
        );
        assert_eq!(resolve(MTValue::invalid(), "com.demo.Pojo", &[]).unwrap(), json!({"class": "com.demo.Pojo"}));
    }

    #[test]
    fn test_custom_resolver_and_missing_default() {
        let mut registry = ResolverRegistry::empty();
        registry.register("upper", |v: &MTValue, _: &str, _: &[String], _: &ResolverRegistry| {
            Ok(json!(text_of(v).to_uppercase()))
        });
        assert_eq!(registry.resolve(&MTValue::text("ab"), "UPPER", &[]).unwrap(), json!("AB"));
        assert!(registry.resolve(&MTValue::text("ab"), "int", &[]).is_err());
    }
}
