//! # Request Dispatcher
//!
//! Runs one HTTP request through the gateway:
//!
//! 1. Select the endpoint version (selectors, then the version locator);
//!    nothing found answers `404 REQUEST:NOT_FOUND`
//! 2. Acquire a pooled [`Context`] and stamp `X-Request-Id` / `X-Request-Time`
//! 3. Run the filter chain, ending in the transport terminal
//! 4. Write errors through the [`ResponseWriter`], except canceled requests
//! 5. Release the context
//!
//! Phase durations (`selector`, `filters`, `transporter`) are recorded on the
//! context and in the duration histogram. A panic anywhere in the request is
//! caught and answered with `GATEWAY:INTERNAL`.
//!
//! ## Rust Concepts Used
//! - `catch_unwind` on a future, wrapped in `AssertUnwindSafe`
//! - `tracing::Instrument` to run the chain inside the request span

use async_trait::async_trait;
use axum::http::StatusCode;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::context::{Context, ContextPool, WebRequest, WebResponse, ATTR_REQUEST_ID, ATTR_REQUEST_TIME};
use crate::core::error::{messages, ServeError, ServeResult};
use crate::core::types::Endpoint;
use crate::gateway::listener::RouteHandler;
use crate::gateway::writer::ResponseWriter;
use crate::middleware::filter::{FilterRegistry, Next, Terminal};
use crate::observability::metrics::{record_access, record_duration, record_error};
use crate::protocols::TransporterRegistry;
use crate::routing::{EndpointLocator, MultiVersionEndpoint};

/// Metric names of the dispatch phases
pub mod phases {
    pub const SELECTOR: &str = "selector";
    pub const FILTERS: &str = "filters";
    pub const TRANSPORTER: &str = "transporter";
}

/// Status answered when the client went away before a response was written
pub const STATUS_CLIENT_CLOSED: u16 = 499;

/// A hook that may reject the request
pub type ContextHook = Arc<dyn Fn(&mut Context) -> ServeResult<()> + Send + Sync>;

/// Hooks run at fixed points of a request
#[derive(Clone, Default)]
pub struct DispatchHooks {
    /// After the context is bound to the request
    pub on_context: Vec<ContextHook>,
    /// Before the filter chain
    pub before_filter: Vec<ContextHook>,
    /// Before the transporter is looked up
    pub before_transport: Vec<ContextHook>,
}

fn run_hooks(hooks: &[ContextHook], ctx: &mut Context) -> ServeResult<()> {
    hooks.iter().try_for_each(|hook| hook(ctx))
}

pub struct Dispatcher {
    locator: EndpointLocator,
    filters: Arc<FilterRegistry>,
    transporters: Arc<TransporterRegistry>,
    writer: Arc<dyn ResponseWriter>,
    pool: ContextPool,
    hooks: DispatchHooks,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("locator", &self.locator)
            .field("filters", &self.filters.globals().len())
            .field("transporters", &self.transporters.protocols())
            .field("writer", &self.writer)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        locator: EndpointLocator,
        filters: Arc<FilterRegistry>,
        transporters: Arc<TransporterRegistry>,
        writer: Arc<dyn ResponseWriter>,
        pool_size: usize,
    ) -> Self {
        Self {
            locator,
            filters,
            transporters,
            writer,
            pool: ContextPool::new(pool_size),
            hooks: DispatchHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: DispatchHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// Serve one request routed to `entry` on `listener_id`
    ///
    /// `None` means nothing was written, which happens only for canceled requests.
    pub async fn dispatch(&self, entry: &MultiVersionEndpoint, listener_id: &str, request: WebRequest) -> Option<WebResponse> {
        match AssertUnwindSafe(self.serve(entry, listener_id, request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let cause = panic_message(panic.as_ref());
                error!(
                    listener = %listener_id,
                    panic = %cause,
                    backtrace = %Backtrace::force_capture(),
                    "DISPATCHER:PANIC"
                );
                let mut ctx = Context::default();
                self.writer
                    .write_error(&mut ctx, &ServeError::internal(messages::DISPATCHER_PANIC).with_cause(cause));
                ctx.take_response()
            }
        }
    }

    async fn serve(&self, entry: &MultiVersionEndpoint, listener_id: &str, request: WebRequest) -> Option<WebResponse> {
        let start = Instant::now();
        let Some(endpoint) = self.locator.lookup(&request, listener_id, entry) else {
            debug!(listener = %listener_id, uri = %request.uri(), "DISPATCHER:ROUTE/notfound");
            let mut ctx = self.pool.acquire(request, Endpoint::default());
            record_access(ctx.service());
            self.handle_error(&mut ctx, ServeError::not_found(messages::ROUTE_NOT_FOUND));
            let response = ctx.take_response();
            self.pool.release(ctx);
            return response;
        };
        let selected = start.elapsed();

        let mut ctx = self.pool.acquire(request, endpoint);
        let request_id = ctx
            .request()
            .header(ATTR_REQUEST_ID)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        ctx.set_attribute(ATTR_REQUEST_ID, json!(request_id));
        ctx.set_attribute(ATTR_REQUEST_TIME, json!(chrono::Utc::now().timestamp_millis()));
        let span = info_span!(
            "dispatch",
            request_id = %request_id,
            endpoint = %format!("{} {}", ctx.endpoint().http_method, ctx.endpoint().http_pattern),
        );
        ctx.set_span(span.clone());
        self.record(&mut ctx, phases::SELECTOR, selected);
        record_access(ctx.service());

        let result = async {
            run_hooks(&self.hooks.on_context, &mut ctx)?;
            self.run_chain(&mut ctx).await
        }
        .instrument(span)
        .await;
        if let Err(err) = result {
            self.handle_error(&mut ctx, err);
        }

        let response = ctx.take_response();
        self.pool.release(ctx);
        response
    }

    async fn run_chain(&self, ctx: &mut Context) -> ServeResult<()> {
        run_hooks(&self.hooks.before_filter, ctx)?;
        let chain = self.filters.build_chain(ctx);
        let start = Instant::now();
        let result = Next::new(&chain, &TransportTerminal { dispatcher: self }).run(ctx).await;
        let transport = ctx
            .metrics()
            .iter()
            .find(|m| m.name == phases::TRANSPORTER)
            .map(|m| m.latency)
            .unwrap_or_default();
        self.record(ctx, phases::FILTERS, start.elapsed().saturating_sub(transport));
        result
    }

    fn record(&self, ctx: &mut Context, phase: &'static str, latency: Duration) {
        ctx.add_metric(phase, latency);
        record_duration(phase, &ctx.service_id(), latency);
    }

    fn handle_error(&self, ctx: &mut Context, err: ServeError) {
        record_error(ctx.service(), &err.error_code);
        if err.is_canceled() {
            debug!(request_id = %ctx.request_id(), message = %err.message, "DISPATCHER:REQUEST/canceled");
            return;
        }
        if err.status_code.is_server_error() {
            warn!(
                request_id = %ctx.request_id(),
                code = %err.error_code,
                message = %err.message,
                cause = ?err.cause,
                "DISPATCHER:REQUEST/failed"
            );
        }
        self.writer.write_error(ctx, &err);
    }
}

/// End of every chain: look up the transporter and call the backend
struct TransportTerminal<'a> {
    dispatcher: &'a Dispatcher,
}

#[async_trait]
impl<'a> Terminal for TransportTerminal<'a> {
    async fn handle(&self, ctx: &mut Context) -> ServeResult<()> {
        let dispatcher = self.dispatcher;
        run_hooks(&dispatcher.hooks.before_transport, ctx)?;
        let protocol = ctx.service().protocol.clone();
        let transporter = dispatcher
            .transporters
            .get(&protocol)
            .ok_or_else(|| ServeError::not_found(messages::ROUTE_UNKNOWN_PROTOCOL).with_cause(&protocol))?;
        let start = Instant::now();
        let result = transporter.transport(ctx, dispatcher.writer.as_ref()).await;
        dispatcher.record(ctx, phases::TRANSPORTER, start.elapsed());
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Route handler bound to one route key on one listener
pub struct EndpointHandler {
    dispatcher: Arc<Dispatcher>,
    entry: Arc<MultiVersionEndpoint>,
    listener_id: String,
}

impl EndpointHandler {
    pub fn new<S: Into<String>>(dispatcher: Arc<Dispatcher>, entry: Arc<MultiVersionEndpoint>, listener_id: S) -> Self {
        Self {
            dispatcher,
            entry,
            listener_id: listener_id.into(),
        }
    }
}

#[async_trait]
impl RouteHandler for EndpointHandler {
    async fn handle(&self, request: WebRequest) -> WebResponse {
        match self.dispatcher.dispatch(&self.entry, &self.listener_id, request).await {
            Some(response) => response,
            None => WebResponse::empty(StatusCode::from_u16(STATUS_CLIENT_CLOSED).unwrap_or(StatusCode::BAD_REQUEST)),
        }
    }
}
