//! Echo transporter: answers with the service and the request it received.

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::context::Context;
use crate::core::error::ServeResult;
use crate::core::lifecycle::Lifecycle;
use crate::core::types::{protocols, Service};
use crate::protocols::{RawResponse, ServeResponse, Transporter};

/// Describe the service and request as JSON
pub fn echo_payload(ctx: &Context, service: &Service) -> Value {
    let request = ctx.request();
    json!({
        "service": service,
        "request-id": ctx.request_id(),
        "request-method": request.method().as_str(),
        "request-uri": request.uri().to_string(),
        "request-path-params": request.path_params(),
        "request-query": request.query_map(),
        "request-headers": request.header_map(),
        "request-attributes": ctx.attributes(),
        "request-body": String::from_utf8_lossy(request.body()),
    })
}

#[derive(Debug, Default)]
pub struct EchoTransporter;

impl Lifecycle for EchoTransporter {}

#[async_trait]
impl Transporter for EchoTransporter {
    fn protocol(&self) -> &str {
        protocols::ECHO
    }

    async fn invoke(&self, ctx: &Context, service: &Service) -> ServeResult<RawResponse> {
        Ok(RawResponse::Value {
            result: echo_payload(ctx, service),
            attachments: Default::default(),
        })
    }

    async fn invoke_codec(&self, ctx: &Context, service: &Service) -> ServeResult<ServeResponse> {
        match self.invoke(ctx, service).await? {
            RawResponse::Value { result, attachments } => {
                let mut response = ServeResponse::json(StatusCode::OK, result);
                response.attachments = attachments;
                Ok(response)
            }
            RawResponse::Http { status, headers, body } => {
                let mut response = ServeResponse::bytes(status, body);
                response.headers = headers;
                Ok(response)
            }
        }
    }
}
