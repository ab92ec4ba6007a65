//! # Protocol Transporters
//!
//! A [`Transporter`] performs the backend call for one protocol:
//!
//! - [`Transporter::invoke`] makes the wire call and returns the protocol's raw result
//! - [`Transporter::invoke_codec`] decodes that result into a [`ServeResponse`]
//! - [`Transporter::transport`] is the terminal step of the filter chain: it checks
//!   for cancellation, runs `invoke_codec`, checks again, then writes the response
//!
//! ## Implementations
//! - [`RpcTransporter`] (`DUBBO`): generic RPC invocation through an [`RpcClient`]
//! - [`HttpTransporter`] (`HTTP`): plain HTTP backends via `reqwest`
//! - [`EchoTransporter`] (`ECHO`): returns what it received
//! - [`InAppTransporter`] (`INAPP`): in-process functions keyed by service id
//!
//! ## Rust Concepts Used
//! - `#[async_trait]` trait objects stored in a registry keyed by protocol
//! - Provided trait methods (`transport`) built on required ones

pub mod assemble;
pub mod echo;
pub mod http;
pub mod inapp;
pub mod rpc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::core::error::{messages, ServeError, ServeResult};
use crate::core::lifecycle::Lifecycle;
use crate::core::types::{service_annotations, Service};
use crate::gateway::writer::ResponseWriter;

pub use assemble::{assemble_arguments, assemble_attachments};
pub use echo::EchoTransporter;
pub use http::HttpTransporter;
pub use inapp::{InAppInvoker, InAppTransporter};
pub use rpc::{ReferenceConfig, RpcClient, RpcReference, RpcResult, RpcTransporter, TripleRpcClient};

/// Backend call timeout from the service's `gateway/rpc.timeout` annotation
///
/// Accepts humantime text (`"3s"`, `"250ms"`) or a plain number of
/// milliseconds; anything else yields `fallback`.
pub fn service_timeout(service: &Service, fallback: Duration) -> Duration {
    let text = service.annotation(service_annotations::RPC_TIMEOUT).get_string();
    let text = text.trim();
    if text.is_empty() {
        return fallback;
    }
    if let Ok(millis) = text.parse::<u64>() {
        return Duration::from_millis(millis);
    }
    humantime::parse_duration(text).unwrap_or(fallback)
}

/// Body of a backend response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    Text(String),
    Json(Value),
}

/// Normalized backend response
#[derive(Debug, Clone)]
pub struct ServeResponse {
    pub status_code: StatusCode,
    pub headers: HeaderMap,
    pub attachments: HashMap<String, Value>,
    pub body: ResponseBody,
}

impl ServeResponse {
    pub fn new(status_code: StatusCode, body: ResponseBody) -> Self {
        Self {
            status_code,
            headers: HeaderMap::new(),
            attachments: HashMap::new(),
            body,
        }
    }

    pub fn json(status_code: StatusCode, value: Value) -> Self {
        Self::new(status_code, ResponseBody::Json(value))
    }

    pub fn bytes(status_code: StatusCode, bytes: Bytes) -> Self {
        Self::new(status_code, ResponseBody::Bytes(bytes))
    }
}

/// Raw result of a backend call, before decoding
#[derive(Debug, Clone)]
pub enum RawResponse {
    /// A structured result plus call attachments
    Value {
        result: Value,
        attachments: HashMap<String, Value>,
    },
    /// A complete HTTP response
    Http {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
}

/// Backend invocation for one protocol
#[async_trait]
pub trait Transporter: Lifecycle + std::fmt::Debug {
    /// Protocol served by this transporter, e.g. `DUBBO`
    fn protocol(&self) -> &str;

    /// Perform the backend call
    async fn invoke(&self, ctx: &Context, service: &Service) -> ServeResult<RawResponse>;

    /// Perform the backend call and decode its result
    async fn invoke_codec(&self, ctx: &Context, service: &Service) -> ServeResult<ServeResponse>;

    /// Call the backend of the context's endpoint and write the response
    ///
    /// Response attachments are copied into the context attributes first.
    /// A canceled request is never written; `GATEWAY:CANCELED` is returned instead.
    async fn transport(&self, ctx: &mut Context, writer: &dyn ResponseWriter) -> ServeResult<()> {
        if ctx.is_canceled() {
            return Err(ServeError::canceled(messages::TRANSPORT_CANCELED_BEFORE));
        }
        let service = ctx.service().clone();
        let result = self.invoke_codec(ctx, &service).await;
        if ctx.is_canceled() {
            return Err(ServeError::canceled(messages::TRANSPORT_CANCELED_AFTER));
        }
        let response = result?;
        for (name, value) in &response.attachments {
            ctx.set_attribute(name.clone(), value.clone());
        }
        writer.write(ctx, response)
    }
}

/// Transporters keyed by upper-cased protocol name
#[derive(Debug, Default)]
pub struct TransporterRegistry {
    transporters: DashMap<String, Arc<dyn Transporter>>,
}

impl TransporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transporter under its protocol, replacing any previous one
    pub fn register(&self, transporter: Arc<dyn Transporter>) {
        let protocol = transporter.protocol().to_ascii_uppercase();
        self.transporters.insert(protocol, transporter);
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn Transporter>> {
        self.transporters
            .get(&protocol.to_ascii_uppercase())
            .map(|t| Arc::clone(t.value()))
    }

    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.transporters.iter().map(|t| t.key().clone()).collect();
        protocols.sort();
        protocols
    }

    pub fn len(&self) -> usize {
        self.transporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transporters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_case_insensitive() {
        let registry = TransporterRegistry::new();
        registry.register(Arc::new(EchoTransporter::default()));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("Echo").is_some());
        assert!(registry.get("DUBBO").is_none());
        assert_eq!(registry.protocols(), vec!["ECHO"]);
    }

    #[test]
    fn test_service_timeout() {
        let fallback = Duration::from_secs(10);
        let mut service = Service::new("HTTP", "demo", "get");
        assert_eq!(service_timeout(&service, fallback), fallback);

        service.annotations.insert(service_annotations::RPC_TIMEOUT, serde_json::json!("3s"));
        assert_eq!(service_timeout(&service, fallback), Duration::from_secs(3));

        service.annotations.insert(service_annotations::RPC_TIMEOUT, serde_json::json!(250));
        assert_eq!(service_timeout(&service, fallback), Duration::from_millis(250));

        service.annotations.insert(service_annotations::RPC_TIMEOUT, serde_json::json!("soon"));
        assert_eq!(service_timeout(&service, fallback), fallback);
    }
}
