//! # Error Handling Module
//!
//! This module defines the error types of the gateway using the `thiserror` crate.
//! Three families of errors exist, each bound to a different layer:
//!
//! - [`GatewayError`]: startup and component errors (configuration, discovery, listeners,
//!   transporters). These are returned from lifecycle hooks and builders.
//! - [`ResolveError`]: failures while converting raw request values into typed call arguments.
//! - [`ServeError`]: request-path errors. Each one carries the HTTP status, the symbolic
//!   error code written to the client, a human message and an optional internal cause
//!   that is logged but never serialized by default.
//!
//! ## Error Codes
//! Every error surfaced to the client carries one of the symbolic codes in [`codes`],
//! e.g. `GATEWAY:INTERNAL` or `REQUEST:INVALID`.
//!
//! ## Rust Concepts Used
//! - `Result<T, E>` with the `?` operator for propagation
//! - `thiserror` derives `Display` and `std::error::Error`
//! - `From` impls for automatic conversion between error layers

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type of the argument resolution engine
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Result type of the request path (filters, transporters, dispatcher)
pub type ServeResult<T> = Result<T, ServeError>;

/// Symbolic error codes written to clients
pub mod codes {
    pub const GATEWAY_INTERNAL: &str = "GATEWAY:INTERNAL";
    pub const GATEWAY_BACKEND: &str = "GATEWAY:BACKEND";
    pub const GATEWAY_CANCELED: &str = "GATEWAY:CANCELED";
    pub const GATEWAY_CIRCUITED: &str = "GATEWAY:CIRCUITED";
    pub const REQUEST_INVALID: &str = "REQUEST:INVALID";
    pub const REQUEST_NOT_FOUND: &str = "REQUEST:NOT_FOUND";
    pub const PERMISSION_ACCESS_DENIED: &str = "PERMISSION:ACCESS_DENIED";
}

/// Well-known error messages
pub mod messages {
    pub const ROUTE_NOT_FOUND: &str = "ROUTE:NOT_FOUND";
    pub const ROUTE_UNKNOWN_PROTOCOL: &str = "ROUTE:UNKNOWN_PROTOCOL";
    pub const DISPATCHER_PANIC: &str = "DISPATCHER:PANIC_RECOVERED";
    pub const TRANSPORT_CANCELED_BEFORE: &str = "DISPATCHER:TRANSPORT:CANCELED/100";
    pub const TRANSPORT_CANCELED_AFTER: &str = "DISPATCHER:TRANSPORT:CANCELED/200";
    pub const TRANSPORT_CODEC_ERROR: &str = "TRANSPORTER:CODEC/error";
    pub const TRANSPORT_RPC_ASSEMBLE_FAILED: &str = "TRANSPORTER:RPC:ASSEMBLE/failed";
    pub const TRANSPORT_RPC_INVOKE_FAILED: &str = "TRANSPORTER:RPC:INVOKE/failed";
    pub const TRANSPORT_HTTP_ASSEMBLE_FAILED: &str = "TRANSPORTER:HTTP:ASSEMBLE/failed";
    pub const TRANSPORT_HTTP_INVOKE_FAILED: &str = "TRANSPORTER:HTTP:INVOKE/failed";
    pub const TRANSPORT_INAPP_NOT_FOUND: &str = "TRANSPORTER:INAPP:INVOKER/notfound";
    pub const ARGUMENT_RESOLVE_FAILED: &str = "REQUEST:ARGUMENT:RESOLVE/failed";
    pub const PERMISSION_SERVICE_NOT_FOUND: &str = "PERMISSION:SERVICE:NOT_FOUND";
    pub const PERMISSION_VERIFY_ERROR: &str = "PERMISSION:VERIFY:ERROR";
    pub const PERMISSION_ACCESS_DENIED: &str = "PERMISSION:ACCESS_DENIED";
}

/// Component and startup error types
///
/// Each variant represents a category of failure outside of a single request.
/// The `#[error("...")]` attribute generates the `Display` implementation.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Discovery source errors (connect, subscribe, watch)
    #[error("Discovery error ({discovery}): {message}")]
    Discovery { discovery: String, message: String },

    /// Malformed discovery payloads
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Transporter setup or lookup errors
    #[error("Transporter error ({protocol}): {message}")]
    Transporter { protocol: String, message: String },

    /// Listener bind and route registration errors
    #[error("Listener error ({listener}): {message}")]
    Listener { listener: String, message: String },

    /// Filter initialization errors
    #[error("Filter error ({filter}): {message}")]
    Filter { filter: String, message: String },

    /// Internal errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML/TOML parsing errors for configuration and resource files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a discovery error for the given discovery id
    pub fn discovery<D: Into<String>, S: Into<String>>(discovery: D, message: S) -> Self {
        Self::Discovery {
            discovery: discovery.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a transporter error for the given protocol
    pub fn transporter<P: Into<String>, S: Into<String>>(protocol: P, message: S) -> Self {
        Self::Transporter {
            protocol: protocol.into(),
            message: message.into(),
        }
    }

    /// Create a listener error for the given listener id
    pub fn listener<L: Into<String>, S: Into<String>>(listener: L, message: S) -> Self {
        Self::Listener {
            listener: listener.into(),
            message: message.into(),
        }
    }

    /// Create a filter error for the given filter id
    pub fn filter<F: Into<String>, S: Into<String>>(filter: F, message: S) -> Self {
        Self::Filter {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code used when this error reaches a client
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode { .. } => StatusCode::BAD_REQUEST,
            Self::Transporter { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the symbolic error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => codes::REQUEST_INVALID,
            Self::Transporter { .. } => codes::GATEWAY_BACKEND,
            _ => codes::GATEWAY_INTERNAL,
        }
    }

    /// Get a short category name for logging and metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Discovery { .. } => "discovery",
            Self::Decode { .. } => "decode",
            Self::Transporter { .. } => "transporter",
            Self::Listener { .. } => "listener",
            Self::Filter { .. } => "filter",
            Self::Internal { .. } => "internal",
            Self::Io { .. } => "io",
            Self::Json { .. } => "json",
            Self::Yaml { .. } => "yaml",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "status": "error",
            "code": self.error_code(),
            "message": self.error_type(),
        }));
        (status, body).into_response()
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Argument resolution errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    /// Scope or key is malformed, or no request is bound
    #[error("lookup failed: {0}")]
    LookupFailed(String),

    /// The raw value cannot be coerced into the declared class
    #[error("unresolvable value for class {class}: {reason}")]
    UnresolvableValue { class: String, reason: String },

    /// The argument is neither primitive nor complex
    #[error("unsupported argument kind: {0}")]
    UnsupportedArgumentKind(String),
}

impl ResolveError {
    pub fn unresolvable<C: Into<String>, R: fmt::Display>(class: C, reason: R) -> Self {
        Self::UnresolvableValue {
            class: class.into(),
            reason: reason.to_string(),
        }
    }
}

/// Request-path error
///
/// Carries everything needed to write an error response. The `cause` is kept
/// for logging only; response writers omit it unless debug output is enabled.
#[derive(Debug, Clone, Error)]
#[error("ServeError: status={status_code}, code={error_code}, message={message}")]
pub struct ServeError {
    /// Response status code
    pub status_code: StatusCode,
    /// Symbolic error code, see [`codes`]
    pub error_code: String,
    /// Client-visible message
    pub message: String,
    /// Internal cause, never written by default
    pub cause: Option<String>,
    /// Extra response headers
    pub headers: HeaderMap,
    /// Tracking metadata, never written
    pub extras: HashMap<String, serde_json::Value>,
}

impl ServeError {
    pub fn new<C: Into<String>, M: Into<String>>(status_code: StatusCode, error_code: C, message: M) -> Self {
        Self {
            status_code,
            error_code: error_code.into(),
            message: message.into(),
            cause: None,
            headers: HeaderMap::new(),
            extras: HashMap::new(),
        }
    }

    /// `GATEWAY:INTERNAL` with status 500
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::GATEWAY_INTERNAL, message)
    }

    /// `GATEWAY:BACKEND` with status 502
    pub fn backend<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, codes::GATEWAY_BACKEND, message)
    }

    /// `GATEWAY:CANCELED` with status 400
    pub fn canceled<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::GATEWAY_CANCELED, message)
    }

    /// `GATEWAY:CIRCUITED` with status 503
    pub fn circuited<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, codes::GATEWAY_CIRCUITED, message)
    }

    /// `REQUEST:INVALID` with status 400
    pub fn invalid_request<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::REQUEST_INVALID, message)
    }

    /// `REQUEST:NOT_FOUND` with status 404
    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::REQUEST_NOT_FOUND, message)
    }

    /// `PERMISSION:ACCESS_DENIED` with status 403
    pub fn access_denied<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::FORBIDDEN, codes::PERMISSION_ACCESS_DENIED, message)
    }

    pub fn with_cause<E: fmt::Display>(mut self, cause: E) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_extra<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Merge extra headers into this error, keeping existing ones
    pub fn merge_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    pub fn is_canceled(&self) -> bool {
        self.error_code == codes::GATEWAY_CANCELED
    }
}

impl From<GatewayError> for ServeError {
    fn from(err: GatewayError) -> Self {
        Self::new(err.status_code(), err.error_code(), err.error_type()).with_cause(err)
    }
}

impl From<ResolveError> for ServeError {
    fn from(err: ResolveError) -> Self {
        Self::invalid_request(messages::ARGUMENT_RESOLVE_FAILED).with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_error_codes() {
        assert_eq!(ServeError::internal("x").status_code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ServeError::canceled("x").error_code, codes::GATEWAY_CANCELED);
        assert!(ServeError::canceled("x").is_canceled());
        assert!(!ServeError::backend("x").is_canceled());
        assert_eq!(ServeError::not_found("x").status_code, StatusCode::NOT_FOUND);
        assert_eq!(ServeError::access_denied("x").status_code, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_resolve_error_maps_to_invalid_request() {
        let err: ServeError = ResolveError::unresolvable("int", "not a number").into();
        assert_eq!(err.error_code, codes::REQUEST_INVALID);
        assert_eq!(err.status_code, StatusCode::BAD_REQUEST);
        assert!(err.cause.unwrap().contains("not a number"));
    }

    #[test]
    fn test_gateway_error_conversion_keeps_cause() {
        let err: ServeError = GatewayError::transporter("HTTP", "connect refused").into();
        assert_eq!(err.error_code, codes::GATEWAY_BACKEND);
        assert_eq!(err.status_code, StatusCode::BAD_GATEWAY);
        assert!(err.cause.unwrap().contains("connect refused"));
    }

    #[test]
    fn test_merge_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", HeaderValue::from_static("1"));
        let err = ServeError::internal("x")
            .with_header(HeaderName::from_static("x-a"), HeaderValue::from_static("a"))
            .merge_headers(&headers);
        assert_eq!(err.headers.len(), 2);
    }
}
