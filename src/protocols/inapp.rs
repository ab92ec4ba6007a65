//! In-process transporter: backend "calls" are async functions registered
//! under a service id (`interface:method`).

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;
use crate::core::error::{messages, ServeError, ServeResult};
use crate::core::lifecycle::Lifecycle;
use crate::core::types::{protocols, Service};
use crate::protocols::echo::echo_payload;
use crate::protocols::{RawResponse, ServeResponse, Transporter};

/// Service id of the built-in echo invoker
pub const DEBUG_ECHO_SERVICE_ID: &str = "gateway.debug.inapp.Test:echo";

/// An in-process backend function
#[async_trait]
pub trait InAppInvoker: Send + Sync {
    async fn invoke(&self, ctx: &Context, service: &Service) -> ServeResult<Value>;
}

struct EchoInvoker;

#[async_trait]
impl InAppInvoker for EchoInvoker {
    async fn invoke(&self, ctx: &Context, service: &Service) -> ServeResult<Value> {
        Ok(echo_payload(ctx, service))
    }
}

pub struct InAppTransporter {
    invokers: HashMap<String, Arc<dyn InAppInvoker>>,
}

impl std::fmt::Debug for InAppTransporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.invokers.keys().collect();
        ids.sort();
        f.debug_struct("InAppTransporter").field("invokers", &ids).finish()
    }
}

impl Default for InAppTransporter {
    fn default() -> Self {
        Self::new().with_invoker(DEBUG_ECHO_SERVICE_ID, Arc::new(EchoInvoker))
    }
}

impl InAppTransporter {
    /// A transporter without any invoker
    pub fn new() -> Self {
        Self {
            invokers: HashMap::new(),
        }
    }

    pub fn with_invoker<S: Into<String>>(mut self, service_id: S, invoker: Arc<dyn InAppInvoker>) -> Self {
        self.invokers.insert(service_id.into(), invoker);
        self
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.invokers.contains_key(service_id)
    }
}

impl Lifecycle for InAppTransporter {}

#[async_trait]
impl Transporter for InAppTransporter {
    fn protocol(&self) -> &str {
        protocols::INAPP
    }

    async fn invoke(&self, ctx: &Context, service: &Service) -> ServeResult<RawResponse> {
        let service_id = service.service_id();
        let invoker = self
            .invokers
            .get(&service_id)
            .ok_or_else(|| ServeError::internal(messages::TRANSPORT_INAPP_NOT_FOUND).with_cause(&service_id))?;
        let result = invoker.invoke(ctx, service).await?;
        Ok(RawResponse::Value {
            result,
            attachments: HashMap::new(),
        })
    }

    async fn invoke_codec(&self, ctx: &Context, service: &Service) -> ServeResult<ServeResponse> {
        match self.invoke(ctx, service).await? {
            RawResponse::Value { result, .. } => Ok(ServeResponse::json(StatusCode::OK, result)),
            RawResponse::Http { status, headers, body } => {
                let mut response = ServeResponse::bytes(status, body);
                response.headers = headers;
                Ok(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WebRequest;
    use crate::core::error::codes;
    use crate::core::types::Endpoint;
    use serde_json::json;

    struct Sum;

    #[async_trait]
    impl InAppInvoker for Sum {
        async fn invoke(&self, ctx: &Context, _service: &Service) -> ServeResult<Value> {
            let total: i64 = ctx
                .request()
                .query_values("n")
                .iter()
                .filter_map(|n| n.parse::<i64>().ok())
                .sum();
            Ok(json!({ "sum": total }))
        }
    }

    fn context(uri: &'static str, service: Service) -> Context {
        let request = WebRequest::new(
            axum::http::Method::GET,
            axum::http::Uri::from_static(uri),
            Default::default(),
            Default::default(),
        );
        Context::new(request, Endpoint { service, ..Default::default() })
    }

    #[tokio::test]
    async fn test_registered_invoker() {
        let transporter = InAppTransporter::new().with_invoker("demo.Math:sum", Arc::new(Sum));
        let service = Service::new("INAPP", "demo.Math", "sum");
        let ctx = context("/sum?n=1&n=2&n=3", service.clone());
        let response = transporter.invoke_codec(&ctx, &service).await.unwrap();
        assert_eq!(response.body, crate::protocols::ResponseBody::Json(json!({"sum": 6})));
    }

    #[tokio::test]
    async fn test_missing_invoker() {
        let transporter = InAppTransporter::default();
        assert!(transporter.contains(DEBUG_ECHO_SERVICE_ID));
        let service = Service::new("INAPP", "demo.Missing", "call");
        let err = transporter.invoke(&context("/", service.clone()), &service).await.unwrap_err();
        assert_eq!(err.error_code, codes::GATEWAY_INTERNAL);
        assert_eq!(err.message, messages::TRANSPORT_INAPP_NOT_FOUND);
    }
}
