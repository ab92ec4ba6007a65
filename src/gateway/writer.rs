//! # Response Writer
//!
//! Turns transporter results and request errors into [`WebResponse`]s stored on
//! the request context. Every response carries the `X-Writer-Id` identity
//! header. Error responses share one JSON envelope:
//!
//! ```json
//! {"status": "error", "code": "GATEWAY:BACKEND", "message": "TRANSPORTER:RPC:INVOKE/failed"}
//! ```
//!
//! The internal cause is added as `"error"` only when debug errors are enabled.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde_json::json;
use std::fmt;
use tracing::error;

use crate::context::{Context, WebResponse};
use crate::core::error::{messages, ServeError, ServeResult};
use crate::protocols::{ResponseBody, ServeResponse};

/// Server identity header
pub const HEADER_WRITER_ID: HeaderName = HeaderName::from_static("x-writer-id");

/// Content type of JSON responses
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Writes responses into the request context
pub trait ResponseWriter: Send + Sync + fmt::Debug {
    /// Write a successful backend response
    fn write(&self, ctx: &mut Context, response: ServeResponse) -> ServeResult<()>;

    /// Write an error response
    fn write_error(&self, ctx: &mut Context, error: &ServeError);
}

/// Default writer: body passthrough for bytes and text, JSON for values
#[derive(Debug, Clone)]
pub struct JsonResponseWriter {
    writer_id: HeaderValue,
    debug_errors: bool,
}

impl Default for JsonResponseWriter {
    fn default() -> Self {
        Self::new("rpc-gateway", false)
    }
}

impl JsonResponseWriter {
    pub fn new(writer_id: &str, debug_errors: bool) -> Self {
        let writer_id = HeaderValue::from_str(writer_id).unwrap_or_else(|_| HeaderValue::from_static("rpc-gateway"));
        Self {
            writer_id,
            debug_errors,
        }
    }

    /// Render an error without a context, e.g. for requests that match no route
    pub fn render_error(&self, error: &ServeError) -> WebResponse {
        let mut body = json!({
            "status": "error",
            "code": error.error_code,
            "message": error.message,
        });
        if self.debug_errors {
            if let Some(cause) = &error.cause {
                body["error"] = json!(cause);
            }
        }
        let mut headers = error.headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(HEADER_WRITER_ID, self.writer_id.clone());
        WebResponse::new(error.status_code, headers, Bytes::from(body.to_string()))
    }

    fn encode(&self, body: ResponseBody, headers: &mut HeaderMap) -> ServeResult<Bytes> {
        let bytes = match body {
            ResponseBody::Empty => Bytes::new(),
            ResponseBody::Bytes(bytes) => bytes,
            ResponseBody::Text(text) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain;charset=utf-8"));
                }
                Bytes::from(text)
            }
            ResponseBody::Json(value) => {
                let encoded = serde_json::to_vec(&value)
                    .map_err(|e| ServeError::internal(messages::TRANSPORT_CODEC_ERROR).with_cause(e))?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
                Bytes::from(encoded)
            }
        };
        Ok(bytes)
    }
}

impl ResponseWriter for JsonResponseWriter {
    fn write(&self, ctx: &mut Context, response: ServeResponse) -> ServeResult<()> {
        let ServeResponse {
            status_code,
            mut headers,
            body,
            ..
        } = response;
        let bytes = self.encode(body, &mut headers)?;
        headers.insert(HEADER_WRITER_ID, self.writer_id.clone());
        ctx.write_response(WebResponse::new(status_code, headers, bytes));
        Ok(())
    }

    fn write_error(&self, ctx: &mut Context, err: &ServeError) {
        if err.status_code == StatusCode::INTERNAL_SERVER_ERROR {
            error!(
                request_id = %ctx.request_id(),
                code = %err.error_code,
                cause = ?err.cause,
                "WRITER:ERROR/internal"
            );
        }
        ctx.write_response(self.render_error(err));
    }
}
