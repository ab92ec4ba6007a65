//! # Generic RPC Transporter
//!
//! Invokes RPC backends generically: the call is described by the interface,
//! the method, the argument type names and the argument values, so the gateway
//! needs no generated stubs. The wire protocol is supplied by an [`RpcClient`].
//!
//! References are created lazily, one per interface. Creation happens under a
//! mutex so concurrent first requests share one reference; a short warm-up
//! delay elapses before the first use.
//!
//! ## Response codec
//! Backends may shape the HTTP response through call attachments:
//! - `@gateway/http.status`: response status code
//! - `@gateway/http.headers`: object of response headers
//!
//! Setting the context variable `disable.codec` skips decoding and answers 200
//! with the raw result.
//!
//! ```yaml
//! transporters:
//!   dubbo:
//!     protocol: dubbo
//!     cluster: failover
//!     load_balance: random
//!     reference_delay: 10ms
//!     trace_enable: false
//! ```

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::arguments::ArgumentResolver;
use crate::context::Context;
use crate::core::config::Configuration;
use crate::core::error::{messages, GatewayError, GatewayResult, ServeError, ServeResult};
use crate::core::lifecycle::Lifecycle;
use crate::core::types::{protocols, service_annotations, value_to_string, NamedValue, Service};
use crate::protocols::{
    assemble_arguments, assemble_attachments, service_timeout, ResponseBody, RawResponse, ServeResponse, Transporter,
};

/// Attachment carrying the response status code
pub const ATTACHMENT_HTTP_STATUS: &str = "@gateway/http.status";
/// Attachment carrying the response headers
pub const ATTACHMENT_HTTP_HEADERS: &str = "@gateway/http.headers";
/// Context variable that disables response decoding
pub const VARIABLE_DISABLE_CODEC: &str = "disable.codec";

/// Everything needed to create a reference to one remote interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReferenceConfig {
    pub url: String,
    pub interface: String,
    pub protocol: String,
    pub group: String,
    pub version: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retries: i64,
    pub cluster: String,
    pub load_balance: String,
}

/// Result of a generic call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RpcResult {
    pub value: Value,
    pub attachments: HashMap<String, Value>,
}

/// A reference to one remote interface
#[async_trait]
pub trait RpcReference: Send + Sync {
    async fn invoke(
        &self,
        method: &str,
        types: &[String],
        values: &[Value],
        attachments: &HashMap<String, Value>,
    ) -> GatewayResult<RpcResult>;
}

/// Creates interface references for one wire protocol
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn refer(&self, config: &ReferenceConfig) -> GatewayResult<Arc<dyn RpcReference>>;
}

#[derive(Debug, Clone)]
struct RpcOptions {
    trace_enable: bool,
    protocol: String,
    cluster: String,
    load_balance: String,
    reference_delay: Duration,
    timeout: Duration,
    retries: i64,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            trace_enable: false,
            protocol: "dubbo".to_string(),
            cluster: "failover".to_string(),
            load_balance: "random".to_string(),
            reference_delay: Duration::from_millis(10),
            timeout: Duration::from_millis(5000),
            retries: 0,
        }
    }
}

pub struct RpcTransporter {
    client: Arc<dyn RpcClient>,
    resolver: ArgumentResolver,
    options: RwLock<RpcOptions>,
    references: Mutex<HashMap<String, Arc<dyn RpcReference>>>,
}

impl std::fmt::Debug for RpcTransporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransporter")
            .field("options", &*self.options.read())
            .finish()
    }
}

impl RpcTransporter {
    pub fn new(client: Arc<dyn RpcClient>, resolver: ArgumentResolver) -> Self {
        Self {
            client,
            resolver,
            options: RwLock::new(RpcOptions::default()),
            references: Mutex::new(HashMap::new()),
        }
    }

    /// Reference configuration for a service
    pub fn reference_config(&self, service: &Service) -> ReferenceConfig {
        let options = self.options.read();
        let retries = service.annotation(service_annotations::RPC_RETRIES).get_string();
        ReferenceConfig {
            url: normalize_url(&service.url, &options.protocol),
            interface: service.interface.clone(),
            protocol: options.protocol.clone(),
            group: service.annotation(service_annotations::RPC_GROUP).get_string(),
            version: service.annotation(service_annotations::RPC_VERSION).get_string(),
            timeout: service_timeout(service, options.timeout),
            retries: retries.trim().parse().unwrap_or(options.retries),
            cluster: options.cluster.clone(),
            load_balance: options.load_balance.clone(),
        }
    }

    /// Get or create the reference of the service's interface
    async fn reference(&self, service: &Service) -> ServeResult<Arc<dyn RpcReference>> {
        let mut references = self.references.lock().await;
        if let Some(reference) = references.get(&service.interface) {
            return Ok(Arc::clone(reference));
        }
        let config = self.reference_config(service);
        let reference = self
            .client
            .refer(&config)
            .await
            .map_err(|e| ServeError::internal(messages::TRANSPORT_RPC_ASSEMBLE_FAILED).with_cause(e))?;
        info!(interface = %config.interface, url = %config.url, "TRANSPORTER:RPC:REFERENCE/created");
        references.insert(service.interface.clone(), Arc::clone(&reference));
        let delay = self.options.read().reference_delay;
        tokio::time::sleep(delay).await;
        Ok(reference)
    }

    /// Number of cached interface references
    pub async fn reference_count(&self) -> usize {
        self.references.lock().await.len()
    }
}

/// Prefix `protocol://` unless the url already has a scheme
fn normalize_url(url: &str, protocol: &str) -> String {
    if url.is_empty() || has_scheme(url) {
        return url.to_string();
    }
    format!("{}://{}", protocol, url)
}

fn has_scheme(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().map_or(false, |c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Decode a generic call result into a response
pub fn decode_result(result: RpcResult, disable_codec: bool) -> ServeResponse {
    let RpcResult { value, mut attachments } = result;
    if disable_codec {
        let mut response = ServeResponse::json(StatusCode::OK, value);
        response.attachments = attachments;
        return response;
    }
    let status = attachments
        .remove(ATTACHMENT_HTTP_STATUS)
        .and_then(|v| value_to_string(&v).trim().parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    let headers = attachments
        .remove(ATTACHMENT_HTTP_HEADERS)
        .map(|v| to_headers(&v))
        .unwrap_or_default();
    let body = match value {
        Value::Null => ResponseBody::Empty,
        other => ResponseBody::Json(other),
    };
    ServeResponse {
        status_code: status,
        headers,
        attachments,
        body,
    }
}

fn to_headers(value: &Value) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Value::Object(map) = value else {
        return headers;
    };
    for (name, item) in map {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let values = match item {
            Value::Array(items) => items.iter().map(value_to_string).collect(),
            other => vec![value_to_string(other)],
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}

#[async_trait]
impl Lifecycle for RpcTransporter {
    async fn init(&self, config: &Configuration) -> GatewayResult<()> {
        let defaults = RpcOptions::default();
        *self.options.write() = RpcOptions {
            trace_enable: config.get_bool("trace_enable"),
            protocol: config.get_string_or("protocol", &defaults.protocol),
            cluster: config.get_string_or("cluster", &defaults.cluster),
            load_balance: config.get_string_or("load_balance", &defaults.load_balance),
            reference_delay: config.get_duration_or("reference_delay", defaults.reference_delay),
            timeout: config.get_duration_or("timeout", defaults.timeout),
            retries: if config.is_set(&["retries"]) {
                config.get_int("retries")
            } else {
                defaults.retries
            },
        };
        Ok(())
    }
}

#[async_trait]
impl Transporter for RpcTransporter {
    fn protocol(&self) -> &str {
        protocols::DUBBO
    }

    async fn invoke(&self, ctx: &Context, service: &Service) -> ServeResult<RawResponse> {
        let (types, values) = assemble_arguments(&self.resolver, ctx, &service.arguments)?;
        let attachments = assemble_attachments(ctx);
        let trace = self.options.read().trace_enable;
        if trace {
            info!(
                request_id = %ctx.request_id(),
                service = %service.service_id(),
                types = ?types,
                values = ?values,
                "TRANSPORTER:RPC:INVOKE/arguments"
            );
        }

        let reference = self.reference(service).await?;
        let result = reference
            .invoke(&service.method, &types, &values, &attachments)
            .await
            .map_err(|e| ServeError::backend(messages::TRANSPORT_RPC_INVOKE_FAILED).with_cause(e))?;
        if trace {
            info!(request_id = %ctx.request_id(), result = ?result.value, "TRANSPORTER:RPC:INVOKE/result");
        } else {
            debug!(request_id = %ctx.request_id(), service = %service.service_id(), "TRANSPORTER:RPC:INVOKE");
        }
        Ok(RawResponse::Value {
            result: result.value,
            attachments: result.attachments,
        })
    }

    async fn invoke_codec(&self, ctx: &Context, service: &Service) -> ServeResult<ServeResponse> {
        let disable_codec = ctx
            .variable(VARIABLE_DISABLE_CODEC)
            .map(|v| NamedValue::new(VARIABLE_DISABLE_CODEC, v.clone()).get_bool())
            .unwrap_or(false);
        match self.invoke(ctx, service).await? {
            RawResponse::Value { result, attachments } => Ok(decode_result(
                RpcResult {
                    value: result,
                    attachments,
                },
                disable_codec,
            )),
            RawResponse::Http { status, headers, body } => {
                let mut response = ServeResponse::bytes(status, body);
                response.headers = headers;
                Ok(response)
            }
        }
    }
}

/// [`RpcClient`] speaking JSON over HTTP (Triple-style unary calls)
///
/// A call is `POST {url}/{interface}/{method}` with the argument values as a
/// JSON array body and the attachments as request headers.
#[derive(Debug, Clone, Default)]
pub struct TripleRpcClient {
    client: reqwest::Client,
}

impl TripleRpcClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RpcClient for TripleRpcClient {
    async fn refer(&self, config: &ReferenceConfig) -> GatewayResult<Arc<dyn RpcReference>> {
        if config.url.is_empty() {
            return Err(GatewayError::transporter(
                protocols::DUBBO,
                format!("no url for interface {}", config.interface),
            ));
        }
        let base_url = match config.url.split_once("://") {
            Some(("http", _)) | Some(("https", _)) => config.url.clone(),
            Some((_, rest)) => format!("http://{}", rest),
            None => format!("http://{}", config.url),
        };
        Ok(Arc::new(TripleReference {
            client: self.client.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            config: config.clone(),
        }))
    }
}

struct TripleReference {
    client: reqwest::Client,
    base_url: String,
    config: ReferenceConfig,
}

#[async_trait]
impl RpcReference for TripleReference {
    async fn invoke(
        &self,
        method: &str,
        _types: &[String],
        values: &[Value],
        attachments: &HashMap<String, Value>,
    ) -> GatewayResult<RpcResult> {
        let url = format!("{}/{}/{}", self.base_url, self.config.interface, method);
        let mut request = self.client.post(&url).timeout(self.config.timeout).json(values);
        if !self.config.group.is_empty() {
            request = request.header("tri-service-group", self.config.group.as_str());
        }
        if !self.config.version.is_empty() {
            request = request.header("tri-service-version", self.config.version.as_str());
        }
        for (key, value) in attachments {
            if key.contains('@') || key.contains(':') {
                continue;
            }
            request = request.header(key.as_str(), value_to_string(value));
        }

        let mut attempts = self.config.retries.max(0) + 1;
        let response = loop {
            attempts -= 1;
            match request.try_clone() {
                Some(req) => match req.send().await {
                    Ok(response) => break response,
                    Err(e) if attempts > 0 => {
                        debug!(url = %url, error = %e, "TRANSPORTER:RPC:TRIPLE/retry");
                    }
                    Err(e) => return Err(GatewayError::transporter(protocols::DUBBO, e.to_string())),
                },
                None => return Err(GatewayError::transporter(protocols::DUBBO, "request is not retryable")),
            }
        };

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::transporter(protocols::DUBBO, e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::transporter(
                protocols::DUBBO,
                format!("{} returned {}: {}", url, status, String::from_utf8_lossy(&bytes)),
            ));
        }
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(RpcResult {
            value,
            attachments: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_scheme() {
        assert_eq!(normalize_url("10.0.0.1:20880", "dubbo"), "dubbo://10.0.0.1:20880");
        assert_eq!(normalize_url("tri://10.0.0.1:50051", "dubbo"), "tri://10.0.0.1:50051");
        assert_eq!(normalize_url("", "dubbo"), "");
        assert!(!has_scheme("1abc://host"));
    }

    #[test]
    fn test_codec_attachments() {
        let mut attachments = HashMap::new();
        attachments.insert(ATTACHMENT_HTTP_STATUS.to_string(), json!("201"));
        attachments.insert(ATTACHMENT_HTTP_HEADERS.to_string(), json!({"x-a": "1", "x-b": ["2", "3"]}));
        attachments.insert("trace".to_string(), json!("t"));
        let response = decode_result(
            RpcResult {
                value: json!({"id": 1}),
                attachments,
            },
            false,
        );
        assert_eq!(response.status_code, StatusCode::CREATED);
        assert_eq!(response.headers["x-a"], "1");
        assert_eq!(response.headers.get_all("x-b").iter().count(), 2);
        assert_eq!(response.attachments.len(), 1);
        assert_eq!(response.body, ResponseBody::Json(json!({"id": 1})));
    }

    #[test]
    fn test_codec_disabled() {
        let mut attachments = HashMap::new();
        attachments.insert(ATTACHMENT_HTTP_STATUS.to_string(), json!(500));
        let response = decode_result(
            RpcResult {
                value: json!("raw"),
                attachments,
            },
            true,
        );
        assert_eq!(response.status_code, StatusCode::OK);
        assert!(response.attachments.contains_key(ATTACHMENT_HTTP_STATUS));
    }

    #[test]
    fn test_reference_config_from_annotations() {
        struct NoClient;

        #[async_trait]
        impl RpcClient for NoClient {
            async fn refer(&self, _config: &ReferenceConfig) -> GatewayResult<Arc<dyn RpcReference>> {
                Err(GatewayError::internal("unused"))
            }
        }

        let transporter = RpcTransporter::new(Arc::new(NoClient), ArgumentResolver::default());
        let mut service = Service::new("DUBBO", "demo.UserService", "get");
        service.url = "127.0.0.1:20880".to_string();
        service.annotations.insert(service_annotations::RPC_GROUP, json!("g1"));
        service.annotations.insert(service_annotations::RPC_TIMEOUT, json!("2s"));
        service.annotations.insert(service_annotations::RPC_RETRIES, json!(2));

        let config = transporter.reference_config(&service);
        assert_eq!(config.url, "dubbo://127.0.0.1:20880");
        assert_eq!(config.group, "g1");
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.retries, 2);
        assert_eq!(config.cluster, "failover");
    }
}
