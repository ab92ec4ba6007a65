//! # HTTP Listeners
//!
//! A [`WebListener`] accepts HTTP requests and routes them to the handlers
//! bound at runtime by the discovery event loop. Handlers can be added while
//! the listener is serving.
//!
//! [`AxumListener`] serves one socket with `axum`. Routes live in one `matchit`
//! radix tree per HTTP method; patterns may use `:name` or `{name}` segments.
//! Each request is buffered, turned into a [`WebRequest`] and handled on its own
//! task. When the client disconnects the request's cancellation token fires.
//!
//! ## Rust Concepts Used
//! - `Arc<RwLock<..>>` shared between the listener and the axum handler state
//! - `CancellationToken::drop_guard` tied to the lifetime of the handler future
//! - Graceful shutdown through `axum::serve(..).with_graceful_shutdown`
//! - `tower_http::trace::TraceLayer` for per-connection request spans

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router as AxumRouter;
use matchit::Router as RadixRouter;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::context::{WebRequest, WebResponse};
use crate::core::config::ListenerConfig;
use crate::core::error::{codes, messages, GatewayError, GatewayResult, ServeError};
use crate::core::lifecycle::Lifecycle;
use crate::gateway::writer::JsonResponseWriter;

/// Handles the requests of one bound route
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: WebRequest) -> WebResponse;
}

/// An HTTP server accepting route bindings at runtime
pub trait WebListener: Lifecycle + fmt::Debug {
    fn listener_id(&self) -> &str;

    /// Bind a handler to `method` + `pattern`
    fn add_handler(&self, method: &Method, pattern: &str, handler: Arc<dyn RouteHandler>) -> GatewayResult<()>;
}

type RouteTable = HashMap<Method, RadixRouter<Arc<dyn RouteHandler>>>;

#[derive(Clone)]
struct ListenerState {
    routes: Arc<RwLock<RouteTable>>,
    writer: JsonResponseWriter,
    max_body_size: usize,
}

pub struct AxumListener {
    id: String,
    config: ListenerConfig,
    state: ListenerState,
    extra_routes: AxumRouter,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl fmt::Debug for AxumListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxumListener")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("local_addr", &*self.local_addr.read())
            .finish()
    }
}

impl AxumListener {
    pub fn new<S: Into<String>>(id: S, config: ListenerConfig, writer: JsonResponseWriter) -> Self {
        let state = ListenerState {
            routes: Arc::new(RwLock::new(HashMap::new())),
            writer,
            max_body_size: config.max_body_size,
        };
        Self {
            id: id.into(),
            config,
            state,
            extra_routes: AxumRouter::new(),
            shutdown: CancellationToken::new(),
            server: Mutex::new(None),
            local_addr: RwLock::new(None),
        }
    }

    /// Serve fixed routes next to the bound ones; they take precedence
    pub fn with_routes(mut self, routes: AxumRouter) -> Self {
        self.extra_routes = self.extra_routes.merge(routes);
        self
    }

    /// The axum application serving the bound routes
    pub fn router(&self) -> AxumRouter {
        let bound = AxumRouter::new().fallback(handle_request).with_state(self.state.clone());
        self.extra_routes
            .clone()
            .merge(bound)
            .layer(TraceLayer::new_for_http())
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }
}

/// Convert `{name}` / `{*name}` segments into the `:name` / `*name` syntax of the radix tree
pub fn to_radix_pattern(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) if name.starts_with('*') => name.to_string(),
            Some(name) => format!(":{}", name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl WebListener for AxumListener {
    fn listener_id(&self) -> &str {
        &self.id
    }

    fn add_handler(&self, method: &Method, pattern: &str, handler: Arc<dyn RouteHandler>) -> GatewayResult<()> {
        let path = to_radix_pattern(pattern);
        let mut routes = self.state.routes.write();
        routes
            .entry(method.clone())
            .or_insert_with(RadixRouter::new)
            .insert(path.clone(), handler)
            .map_err(|e| GatewayError::listener(&self.id, format!("Failed to add route {} {}: {}", method, path, e)))?;
        debug!(listener = %self.id, method = %method, pattern = %path, "LISTENER:ROUTE:ADDED");
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for AxumListener {
    async fn startup(&self) -> GatewayResult<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::listener(&self.id, format!("Failed to bind {}: {}", addr, e)))?;
        let bound = listener.local_addr()?;
        *self.local_addr.write() = Some(bound);

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();
        let id = self.id.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(e) = server.await {
                error!(listener = %id, error = %e, "LISTENER:SERVE/failed");
            }
        });
        *self.server.lock() = Some(handle);
        info!(listener = %self.id, address = %bound, "LISTENER:STARTED");
        Ok(())
    }

    async fn shutdown(&self) -> GatewayResult<()> {
        self.shutdown.cancel();
        let handle = self.server.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| GatewayError::listener(&self.id, format!("Server task failed: {}", e)))?;
        }
        info!(listener = %self.id, "LISTENER:STOPPED");
        Ok(())
    }
}

async fn handle_request(
    State(state): State<ListenerState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let matched = {
        let routes = state.routes.read();
        routes
            .get(&parts.method)
            .and_then(|router| router.at(parts.uri.path()).ok())
            .map(|m| {
                let params: HashMap<String, String> =
                    m.params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                (Arc::clone(m.value), params)
            })
    };
    let Some((handler, params)) = matched else {
        return state
            .writer
            .render_error(&ServeError::not_found(messages::ROUTE_NOT_FOUND))
            .into_response();
    };

    let body = match to_bytes(body, state.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            let err = ServeError::new(StatusCode::PAYLOAD_TOO_LARGE, codes::REQUEST_INVALID, "REQUEST:BODY/invalid").with_cause(e);
            return state.writer.render_error(&err).into_response();
        }
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let mut request = WebRequest::new(parts.method, parts.uri, parts.headers, body)
        .with_path_params(params)
        .with_cancel_token(cancel);
    if let Some(ConnectInfo(addr)) = connect_info {
        request = request.with_remote_addr(addr);
    }

    match tokio::spawn(async move { handler.handle(request).await }).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            let err = ServeError::internal(messages::DISPATCHER_PANIC).with_cause(e);
            state.writer.render_error(&err).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    struct Hello;

    #[async_trait]
    impl RouteHandler for Hello {
        async fn handle(&self, request: WebRequest) -> WebResponse {
            let id = request.path_param("id").unwrap_or_default().to_string();
            WebResponse::new(StatusCode::OK, Default::default(), bytes::Bytes::from(id))
        }
    }

    #[test]
    fn test_pattern_conversion() {
        assert_eq!(to_radix_pattern("/users/{id}"), "/users/:id");
        assert_eq!(to_radix_pattern("/users/:id/orders"), "/users/:id/orders");
        assert_eq!(to_radix_pattern("/files/{*path}"), "/files/*path");
    }

    #[tokio::test]
    async fn test_routes_and_fallback() {
        let listener = AxumListener::new("default", ListenerConfig::default(), JsonResponseWriter::default());
        listener.add_handler(&Method::GET, "/users/{id}", Arc::new(Hello)).unwrap();
        assert!(listener.add_handler(&Method::GET, "/users/{id}", Arc::new(Hello)).is_err());

        let response = listener
            .router()
            .oneshot(Request::get("/users/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"42");

        let response = listener
            .router()
            .oneshot(Request::post("/users/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fixed_routes_take_precedence() {
        let fixed = AxumRouter::new().route("/status", axum::routing::get(|| async { "fixed" }));
        let listener = AxumListener::new("default", ListenerConfig::default(), JsonResponseWriter::default())
            .with_routes(fixed);
        listener.add_handler(&Method::GET, "/{id}", Arc::new(Hello)).unwrap();

        let response = listener
            .router()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"fixed");

        let response = listener
            .router()
            .oneshot(Request::get("/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"7");
    }
}
