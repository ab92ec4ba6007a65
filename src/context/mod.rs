//! # Request Context
//!
//! A [`Context`] carries the per-request state threaded through the filter chain
//! and into the transporter:
//!
//! - the endpoint copy matched for the request
//! - request-scoped attributes, which shadow endpoint attributes of the same name
//! - named phase durations recorded by the dispatcher
//! - the start instant and the request's `tracing` span
//! - the inbound [`WebRequest`] and the response slot
//!
//! Contexts are pooled by [`ContextPool`]. [`Context::reset`] clears every mutable
//! field, so nothing leaks from one request into the next.
//!
//! ## Rust Concepts Used
//! - `&mut Context` ownership: exactly one stage of the chain mutates it at a time
//! - `parking_lot::Mutex` around the pool free list

pub mod web;

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::Span;

use crate::core::types::{value_to_string, Endpoint, Service};

pub use web::{WebRequest, WebResponse};

/// Attribute holding the request id
pub const ATTR_REQUEST_ID: &str = "X-Request-Id";
/// Attribute holding the request receive time in epoch milliseconds
pub const ATTR_REQUEST_TIME: &str = "X-Request-Time";

/// A named duration recorded at a phase boundary
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMetric {
    pub name: String,
    pub latency: Duration,
}

/// Per-request state
#[derive(Debug)]
pub struct Context {
    endpoint: Endpoint,
    request: WebRequest,
    attributes: HashMap<String, Value>,
    metrics: Vec<TraceMetric>,
    start_at: Instant,
    span: Span,
    response: Option<WebResponse>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            request: WebRequest::default(),
            attributes: HashMap::new(),
            metrics: Vec::new(),
            start_at: Instant::now(),
            span: Span::none(),
            response: None,
        }
    }
}

impl Context {
    pub fn new(request: WebRequest, endpoint: Endpoint) -> Self {
        let mut ctx = Self::default();
        ctx.reset(request, endpoint);
        ctx
    }

    /// Bind a new request and endpoint, clearing all previous state
    pub fn reset(&mut self, request: WebRequest, endpoint: Endpoint) {
        self.endpoint = endpoint;
        self.request = request;
        self.attributes.clear();
        self.metrics.clear();
        self.start_at = Instant::now();
        self.span = Span::none();
        self.response = None;
    }

    /// Drop request data so an idle pooled context holds nothing
    fn clear(&mut self) {
        self.reset(WebRequest::default(), Endpoint::default());
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Mutable access to this request's endpoint copy
    pub fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    pub fn service(&self) -> &Service {
        &self.endpoint.service
    }

    pub fn service_id(&self) -> String {
        self.endpoint.service.service_id()
    }

    pub fn application(&self) -> &str {
        &self.endpoint.application
    }

    pub fn request_id(&self) -> String {
        self.attributes.get(ATTR_REQUEST_ID).map(value_to_string).unwrap_or_default()
    }

    /// Request attribute, falling back to the endpoint attribute of the same name
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes
            .get(name)
            .cloned()
            .or_else(|| self.endpoint.attribute(name).map(|a| a.value.clone()))
    }

    /// Request-scoped attributes only
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn set_attribute<S: Into<String>>(&mut self, name: S, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.request.variable(name)
    }

    pub fn set_variable<S: Into<String>>(&mut self, name: S, value: Value) {
        self.request.set_variable(name, value);
    }

    pub fn add_metric<S: Into<String>>(&mut self, name: S, latency: Duration) {
        self.metrics.push(TraceMetric {
            name: name.into(),
            latency,
        });
    }

    pub fn metrics(&self) -> &[TraceMetric] {
        &self.metrics
    }

    pub fn start_at(&self) -> Instant {
        self.start_at
    }

    /// The request's logger
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn request(&self) -> &WebRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut WebRequest {
        &mut self.request
    }

    pub fn response(&self) -> Option<&WebResponse> {
        self.response.as_ref()
    }

    pub fn write_response(&mut self, response: WebResponse) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<WebResponse> {
        self.response.take()
    }

    pub fn is_canceled(&self) -> bool {
        self.request.is_canceled()
    }
}

/// Pool of reusable contexts
#[derive(Debug)]
pub struct ContextPool {
    idle: Mutex<Vec<Context>>,
    capacity: usize,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take an idle context (or build one) bound to the request
    pub fn acquire(&self, request: WebRequest, endpoint: Endpoint) -> Context {
        let idle = self.idle.lock().pop();
        match idle {
            Some(mut ctx) => {
                ctx.reset(request, endpoint);
                ctx
            }
            None => Context::new(request, endpoint),
        }
    }

    /// Return a context; it is cleared first and dropped when the pool is full
    pub fn release(&self, mut ctx: Context) {
        ctx.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(ctx);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(256)
    }
}
