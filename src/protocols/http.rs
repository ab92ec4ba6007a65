//! # HTTP Transporter
//!
//! Forwards requests to plain HTTP backends with `reqwest`:
//!
//! - URL from `service.url`
//! - Query string from `QUERY`, `QUERY_MUL` and `QUERY_MAP` arguments; a service
//!   without arguments forwards every query parameter of the request
//! - `FORM*` arguments become an urlencoded body, otherwise the original body and
//!   its content type are forwarded
//! - Request headers plus context attributes (keys without `@` or `:`)
//! - Per-call timeout from `gateway/rpc.timeout`
//!
//! The backend response status, headers and body pass through untouched.
//!
//! ## Rust Concepts Used
//! - `tokio::select!` to race the backend call against request cancellation
//! - Conversion between the `http` 0.2 types of `reqwest` and the `http` 1.x types
//!   of `axum` through their byte representations

use async_trait::async_trait;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::arguments::{scopes, ArgumentResolver};
use crate::context::web::FORM_URLENCODED;
use crate::context::Context;
use crate::core::config::Configuration;
use crate::core::error::{messages, GatewayResult, ServeError, ServeResult};
use crate::core::lifecycle::Lifecycle;
use crate::core::types::{protocols, value_to_string, Argument, Service};
use crate::core::value::MTValue;
use crate::protocols::{service_timeout, RawResponse, ServeResponse, Transporter};

/// User agent of outbound requests
pub const USER_AGENT: &str = concat!("rpc-gateway/", env!("CARGO_PKG_VERSION"));

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct HttpTransporter {
    client: reqwest::Client,
    resolver: ArgumentResolver,
    default_timeout: RwLock<Duration>,
}

impl Default for HttpTransporter {
    fn default() -> Self {
        Self::new(ArgumentResolver::default())
    }
}

impl HttpTransporter {
    pub fn new(resolver: ArgumentResolver) -> Self {
        Self::with_client(reqwest::Client::new(), resolver)
    }

    pub fn with_client(client: reqwest::Client, resolver: ArgumentResolver) -> Self {
        Self {
            client,
            resolver,
            default_timeout: RwLock::new(DEFAULT_TIMEOUT),
        }
    }

    fn build_request(&self, ctx: &Context, service: &Service) -> ServeResult<reqwest::Request> {
        let assemble_failed = |cause: String| ServeError::internal(messages::TRANSPORT_HTTP_ASSEMBLE_FAILED).with_cause(cause);

        let mut url = Url::parse(&service.url).map_err(|e| assemble_failed(format!("url '{}': {}", service.url, e)))?;
        let method = reqwest::Method::from_bytes(ctx.request().method().as_str().as_bytes())
            .map_err(|e| assemble_failed(e.to_string()))?;

        let query = self.query_pairs(ctx, service)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let form = self.argument_pairs(ctx, &service.arguments, &[scopes::FORM, scopes::FORM_MUL, scopes::FORM_MAP])?;
        let (content_type, body) = if form.is_empty() {
            let request = ctx.request();
            (request.content_type().to_string(), request.body().clone())
        } else {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(form)
                .finish();
            (FORM_URLENCODED.to_string(), Bytes::from(encoded))
        };

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &forward_headers(ctx) {
            let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes());
            let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes());
            if let (Ok(name), Ok(value)) = (name, value) {
                headers.append(name, value);
            }
        }
        if !content_type.is_empty() {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&content_type) {
                headers.insert(reqwest::header::CONTENT_TYPE, value);
            }
        }
        headers.insert(reqwest::header::USER_AGENT, reqwest::header::HeaderValue::from_static(USER_AGENT));

        self.client
            .request(method, url)
            .headers(headers)
            .timeout(service_timeout(service, *self.default_timeout.read()))
            .body(body)
            .build()
            .map_err(|e| assemble_failed(e.to_string()))
    }

    fn query_pairs(&self, ctx: &Context, service: &Service) -> ServeResult<Vec<(String, String)>> {
        if service.arguments.is_empty() {
            return Ok(ctx.request().query_pairs().to_vec());
        }
        self.argument_pairs(ctx, &service.arguments, &[scopes::QUERY, scopes::QUERY_MUL, scopes::QUERY_MAP])
    }

    /// Name/value pairs of the arguments declared in one of `scopes`
    fn argument_pairs(&self, ctx: &Context, arguments: &[Argument], scopes: &[&str]) -> ServeResult<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for argument in arguments {
            if !scopes.iter().any(|s| s.eq_ignore_ascii_case(&argument.http_scope)) {
                continue;
            }
            let value = self.resolver.lookup(argument, ctx)?;
            let name = if argument.http_name.is_empty() { &argument.name } else { &argument.http_name };
            append_pairs(&mut pairs, name, &value);
        }
        Ok(pairs)
    }
}

/// Flatten a looked-up value into query/form pairs
fn append_pairs(pairs: &mut Vec<(String, String)>, name: &str, value: &MTValue) {
    if !value.is_valid() {
        return;
    }
    match value.value() {
        Some(Value::Array(items)) => {
            pairs.extend(items.iter().map(|item| (name.to_string(), value_to_string(item))));
        }
        Some(Value::Object(map)) => {
            for (key, item) in map {
                match item {
                    Value::Array(items) => pairs.extend(items.iter().map(|i| (key.clone(), value_to_string(i)))),
                    other => pairs.push((key.clone(), value_to_string(other))),
                }
            }
        }
        Some(other) => pairs.push((name.to_string(), value_to_string(other))),
        None => {
            if let Some(bytes) = value.bytes() {
                pairs.push((name.to_string(), String::from_utf8_lossy(bytes).into_owned()));
            }
        }
    }
}

/// Inbound headers minus connection-specific ones, plus context attributes
fn forward_headers(ctx: &Context) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in ctx.request().headers() {
        if [HOST, CONTENT_LENGTH, CONTENT_TYPE, CONNECTION, TRANSFER_ENCODING].contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    for (key, value) in ctx.attributes() {
        if key.contains('@') || key.contains(':') {
            continue;
        }
        let name = HeaderName::from_bytes(key.as_bytes());
        let value = HeaderValue::from_str(&value_to_string(value));
        if let (Ok(name), Ok(value)) = (name, value) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Backend response headers as `axum` headers, minus framing headers
fn response_headers(source: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in source {
        let name = HeaderName::from_bytes(name.as_str().as_bytes());
        let value = HeaderValue::from_bytes(value.as_bytes());
        if let (Ok(name), Ok(value)) = (name, value) {
            if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
                continue;
            }
            headers.append(name, value);
        }
    }
    headers
}

#[async_trait]
impl Lifecycle for HttpTransporter {
    async fn init(&self, config: &Configuration) -> GatewayResult<()> {
        *self.default_timeout.write() = config.get_duration_or("timeout", DEFAULT_TIMEOUT);
        Ok(())
    }
}

#[async_trait]
impl Transporter for HttpTransporter {
    fn protocol(&self) -> &str {
        protocols::HTTP
    }

    async fn invoke(&self, ctx: &Context, service: &Service) -> ServeResult<RawResponse> {
        let request = self.build_request(ctx, service)?;
        debug!(request_id = %ctx.request_id(), url = %request.url(), "TRANSPORTER:HTTP:INVOKE");

        let call = async {
            let response = self.client.execute(request).await?;
            let status = response.status().as_u16();
            let headers = response_headers(response.headers());
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, body))
        };
        let (status, headers, body) = tokio::select! {
            _ = ctx.request().cancel_token().cancelled() => {
                return Err(ServeError::canceled(messages::TRANSPORT_CANCELED_AFTER));
            }
            result = call => result.map_err(|e| ServeError::backend(messages::TRANSPORT_HTTP_INVOKE_FAILED).with_cause(e))?,
        };
        let status = StatusCode::from_u16(status).map_err(|e| ServeError::backend(messages::TRANSPORT_HTTP_INVOKE_FAILED).with_cause(e))?;
        Ok(RawResponse::Http { status, headers, body })
    }

    async fn invoke_codec(&self, ctx: &Context, service: &Service) -> ServeResult<ServeResponse> {
        match self.invoke(ctx, service).await? {
            RawResponse::Http { status, headers, body } => {
                let mut response = ServeResponse::bytes(status, body);
                response.headers = headers;
                Ok(response)
            }
            RawResponse::Value { result, attachments } => {
                let mut response = ServeResponse::json(StatusCode::OK, result);
                response.attachments = attachments;
                Ok(response)
            }
        }
    }
}
