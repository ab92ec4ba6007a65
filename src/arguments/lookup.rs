//! Scope lookups: locate the raw value of an argument in the request.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::context::Context;
use crate::core::error::{ResolveError, ResolveResult};
use crate::core::value::MTValue;

/// Lookup function: `(ctx, scope, key) -> raw value`
pub type LookupFunc = Arc<dyn Fn(&Context, &str, &str) -> ResolveResult<MTValue> + Send + Sync>;

/// Scope names accepted in `httpScope`
pub mod scopes {
    pub const PATH: &str = "PATH";
    pub const PATH_MAP: &str = "PATH_MAP";
    pub const QUERY: &str = "QUERY";
    pub const QUERY_MUL: &str = "QUERY_MUL";
    pub const QUERY_MAP: &str = "QUERY_MAP";
    pub const FORM: &str = "FORM";
    pub const FORM_MUL: &str = "FORM_MUL";
    pub const FORM_MAP: &str = "FORM_MAP";
    pub const PARAM: &str = "PARAM";
    pub const HEADER: &str = "HEADER";
    pub const HEADER_MAP: &str = "HEADER_MAP";
    pub const COOKIE: &str = "COOKIE";
    pub const ATTR: &str = "ATTR";
    pub const ATTRS: &str = "ATTRS";
    pub const BODY: &str = "BODY";
    pub const REQUEST: &str = "REQUEST";
    pub const AUTO: &str = "AUTO";
}

/// Keys of the `REQUEST` scope
pub mod request_keys {
    pub const METHOD: &str = "METHOD";
    pub const URI: &str = "URI";
    pub const HOST: &str = "HOST";
    pub const REMOTE_ADDR: &str = "REMOTEADDR";
}

/// The lookup used unless another one is installed
pub fn default_lookup_func() -> LookupFunc {
    Arc::new(default_lookup)
}

/// Look up `key` in `scope` of the request bound to `ctx`
///
/// A missing value is not an error: it yields [`MTValue::invalid`]. Only an
/// empty scope or key fails.
pub fn default_lookup(ctx: &Context, scope: &str, key: &str) -> ResolveResult<MTValue> {
    if scope.is_empty() || key.is_empty() {
        return Err(ResolveError::LookupFailed(format!(
            "scope and key are required, scope: '{}', key: '{}'",
            scope, key
        )));
    }
    let request = ctx.request();
    let value = match scope.to_ascii_uppercase().as_str() {
        scopes::PATH => request
            .path_param(key)
            .map(MTValue::text)
            .unwrap_or_else(MTValue::invalid),
        scopes::PATH_MAP => {
            let map = request
                .path_params()
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<String, Value>>();
            MTValue::object_map(map)
        }
        scopes::QUERY => texts(request.query_values(key)),
        scopes::QUERY_MUL => MTValue::text_list(request.query_values(key)),
        scopes::QUERY_MAP => MTValue::text_list_map(request.query_map()),
        scopes::FORM => texts(request.form_values(key)),
        scopes::FORM_MUL => MTValue::text_list(request.form_values(key)),
        scopes::FORM_MAP => MTValue::text_list_map(request.form_map()),
        scopes::PARAM => {
            let query = request.query_values(key);
            if query.is_empty() {
                texts(request.form_values(key))
            } else {
                texts(query)
            }
        }
        scopes::HEADER => texts(request.header_values(key)),
        scopes::HEADER_MAP => MTValue::text_list_map(request.header_map()),
        scopes::COOKIE => request.cookie(key).map(MTValue::text).unwrap_or_else(MTValue::invalid),
        scopes::ATTR => ctx.attribute(key).map(MTValue::from_value).unwrap_or_else(MTValue::invalid),
        scopes::ATTRS => {
            let mut map: Map<String, Value> = ctx
                .endpoint()
                .attributes
                .iter()
                .map(|a| (a.name.clone(), a.value.clone()))
                .collect();
            for (k, v) in ctx.attributes() {
                map.insert(k.clone(), v.clone());
            }
            MTValue::object_map(map)
        }
        scopes::BODY => MTValue::body(request.body().clone(), request.content_type()),
        scopes::REQUEST => match key.to_ascii_uppercase().as_str() {
            request_keys::METHOD => MTValue::text(request.method().as_str()),
            request_keys::URI => MTValue::text(request.uri().to_string()),
            request_keys::HOST => MTValue::text(request.host()),
            request_keys::REMOTE_ADDR => MTValue::text(request.remote_addr()),
            _ => MTValue::invalid(),
        },
        _ => auto_lookup(ctx, key),
    };
    Ok(value)
}

/// Path, query, form, header, then context attribute; first present wins
fn auto_lookup(ctx: &Context, key: &str) -> MTValue {
    let request = ctx.request();
    if let Some(v) = request.path_param(key) {
        return MTValue::text(v);
    }
    for values in [
        request.query_values(key),
        request.form_values(key),
        request.header_values(key),
    ] {
        if !values.is_empty() {
            return texts(values);
        }
    }
    ctx.attribute(key)
        .filter(|v| !v.is_null())
        .map(MTValue::from_value)
        .unwrap_or_else(MTValue::invalid)
}

/// One value yields text, several yield a text list, none is invalid
fn texts(mut values: Vec<String>) -> MTValue {
    match values.len() {
        0 => MTValue::invalid(),
        1 => MTValue::text(values.remove(0)),
        _ => MTValue::text_list(values),
    }
}
