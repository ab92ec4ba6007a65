//! End-to-end dispatch: endpoint selection, filter chain, transport and error envelopes.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;
use parking_lot::Mutex;
use rpc_gateway::context::{Context, WebRequest};
use rpc_gateway::core::error::{codes, messages, ServeError, ServeResult};
use rpc_gateway::core::lifecycle::Lifecycle;
use rpc_gateway::core::types::{Endpoint, Service};
use rpc_gateway::gateway::writer::HEADER_WRITER_ID;
use rpc_gateway::gateway::{ContextHook, DispatchHooks, Dispatcher, JsonResponseWriter};
use rpc_gateway::middleware::{Filter, FilterRegistry, Next};
use rpc_gateway::observability::metrics::{ACCESS_TOTAL, ERROR_TOTAL};
use rpc_gateway::protocols::{EchoTransporter, InAppInvoker, InAppTransporter, TransporterRegistry};
use rpc_gateway::routing::{EndpointLocator, MultiVersionEndpoint};
use serde_json::{json, Value};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Recording {
    id: String,
    order: i32,
    log: Arc<Mutex<Vec<String>>>,
}

impl Lifecycle for Recording {
    fn order(&self) -> i32 {
        self.order
    }
}

#[async_trait]
impl Filter for Recording {
    fn filter_id(&self) -> &str {
        &self.id
    }

    async fn do_filter(&self, ctx: &mut Context, next: Next<'_>) -> ServeResult<()> {
        self.log.lock().push(self.id.clone());
        next.run(ctx).await
    }
}

#[derive(Debug)]
struct Deny;

impl Lifecycle for Deny {}

#[async_trait]
impl Filter for Deny {
    fn filter_id(&self) -> &str {
        "deny"
    }

    async fn do_filter(&self, _: &mut Context, _: Next<'_>) -> ServeResult<()> {
        Err(ServeError::access_denied("FILTER:DENY"))
    }
}

#[derive(Debug)]
struct Explode;

impl Lifecycle for Explode {}

#[async_trait]
impl Filter for Explode {
    fn filter_id(&self) -> &str {
        "explode"
    }

    async fn do_filter(&self, _: &mut Context, _: Next<'_>) -> ServeResult<()> {
        panic!("filter exploded");
    }
}

struct Counting(Arc<AtomicUsize>);

#[async_trait]
impl InAppInvoker for Counting {
    async fn invoke(&self, _: &Context, service: &Service) -> ServeResult<Value> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"service": service.service_id()}))
    }
}

fn transporters(calls: Arc<AtomicUsize>) -> Arc<TransporterRegistry> {
    let registry = TransporterRegistry::new();
    registry.register(Arc::new(EchoTransporter));
    registry.register(Arc::new(
        InAppTransporter::new().with_invoker("demo.UserService:get", Arc::new(Counting(calls))),
    ));
    Arc::new(registry)
}

fn dispatcher(filters: FilterRegistry, calls: Arc<AtomicUsize>) -> Dispatcher {
    Dispatcher::new(
        EndpointLocator::default(),
        Arc::new(filters),
        transporters(calls),
        Arc::new(JsonResponseWriter::new("gw-test", true)),
        4,
    )
}

fn endpoint(version: &str, protocol: &str) -> Endpoint {
    Endpoint {
        version: version.to_string(),
        http_method: "GET".to_string(),
        http_pattern: "/users/{id}".to_string(),
        service_id: "demo.UserService:get".to_string(),
        service: Service::new(protocol, "demo.UserService", "get"),
        ..Default::default()
    }
}

fn request(version: Option<&'static str>) -> WebRequest {
    let mut headers = HeaderMap::new();
    if let Some(v) = version {
        headers.insert("x-version", HeaderValue::from_static(v));
    }
    WebRequest::new(Method::GET, Uri::from_static("/users/1?x=1"), headers, Bytes::new())
}

#[tokio::test]
async fn echo_request_round_trip() {
    let dispatcher = dispatcher(FilterRegistry::new(), Arc::default());
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "ECHO"));

    let mut req = request(None);
    let mut headers = req.headers().clone();
    headers.insert("x-request-id", HeaderValue::from_static("req-42"));
    req = WebRequest::new(Method::GET, req.uri().clone(), headers, Bytes::new());

    let response = dispatcher.dispatch(&entry, "default", req).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers[HEADER_WRITER_ID], "gw-test");
    let body = response.json().unwrap();
    assert_eq!(body["request-id"], "req-42");
    assert_eq!(body["request-query"]["x"], json!(["1"]));
    assert_eq!(body["service"]["interface"], "demo.UserService");
    assert_eq!(dispatcher.pool().idle_count(), 1);
}

#[tokio::test]
async fn filters_run_in_ascending_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut filters = FilterRegistry::new();
    for order in [3, 1, 2] {
        filters.add_global(Arc::new(Recording {
            id: format!("f{}", order),
            order,
            log: Arc::clone(&log),
        }));
    }
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = dispatcher(filters, Arc::clone(&calls));
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "INAPP"));

    let response = dispatcher.dispatch(&entry, "default", request(None)).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(*log.lock(), vec!["f1", "f2", "f3"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_filter_short_circuits() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut filters = FilterRegistry::new();
    filters.add_global(Arc::new(Deny));
    filters.add_global(Arc::new(Recording {
        id: "after".to_string(),
        order: 10,
        log: Arc::clone(&log),
    }));
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = dispatcher(filters, Arc::clone(&calls));
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "INAPP"));

    let response = dispatcher.dispatch(&entry, "default", request(None)).await.unwrap();
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    let body = response.json().unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], codes::PERMISSION_ACCESS_DENIED);
    assert_eq!(body["message"], "FILTER:DENY");
    assert!(log.lock().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_version_is_not_found() {
    let dispatcher = dispatcher(FilterRegistry::new(), Arc::default());
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "ECHO"));
    entry.update("2.0", endpoint("2.0", "ECHO"));

    let response = dispatcher.dispatch(&entry, "default", request(Some("3.0"))).await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json().unwrap()["code"], codes::REQUEST_NOT_FOUND);

    let response = dispatcher.dispatch(&entry, "default", request(Some("2.0"))).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
}

#[test]
fn unmatched_route_is_counted_as_access() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let dispatcher = dispatcher(FilterRegistry::new(), Arc::default());
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "ECHO"));
    entry.update("2.0", endpoint("2.0", "ECHO"));

    let response = metrics::with_local_recorder(&recorder, || {
        tokio_test::block_on(dispatcher.dispatch(&entry, "default", request(Some("3.0"))))
    })
    .unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let rendered = handle.render();
    let access: Vec<&str> = rendered.lines().filter(|l| l.starts_with(ACCESS_TOTAL)).collect();
    assert_eq!(access.len(), 1, "{}", rendered);
    assert!(access[0].ends_with(" 1"), "{}", rendered);
    assert!(rendered
        .lines()
        .any(|l| l.starts_with(ERROR_TOTAL) && l.contains(codes::REQUEST_NOT_FOUND)));
}

#[tokio::test]
async fn unknown_protocol_is_not_found() {
    let dispatcher = dispatcher(FilterRegistry::new(), Arc::default());
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "GRPC"));

    let response = dispatcher.dispatch(&entry, "default", request(None)).await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let body = response.json().unwrap();
    assert_eq!(body["message"], messages::ROUTE_UNKNOWN_PROTOCOL);
    assert_eq!(body["error"], "GRPC");
}

#[tokio::test]
async fn canceled_request_writes_nothing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = dispatcher(FilterRegistry::new(), Arc::clone(&calls));
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "INAPP"));

    let token = CancellationToken::new();
    token.cancel();
    let response = dispatcher
        .dispatch(&entry, "default", request(None).with_cancel_token(token))
        .await;
    assert!(response.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panic_is_answered_with_internal_error() {
    let mut filters = FilterRegistry::new();
    filters.add_global(Arc::new(Explode));
    let dispatcher = dispatcher(filters, Arc::default());
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "ECHO"));

    let response = dispatcher.dispatch(&entry, "default", request(None)).await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json().unwrap();
    assert_eq!(body["code"], codes::GATEWAY_INTERNAL);
    assert_eq!(body["message"], messages::DISPATCHER_PANIC);
    assert_eq!(body["error"], "filter exploded");
}

#[tokio::test]
async fn context_hook_rejects_request() {
    let require_auth: ContextHook = Arc::new(|ctx: &mut Context| {
        if ctx.request().header("authorization").is_none() {
            return Err(ServeError::invalid_request("HOOK:AUTH/missing"));
        }
        Ok(())
    });
    let hooks = DispatchHooks {
        on_context: vec![require_auth],
        ..Default::default()
    };
    let dispatcher = dispatcher(FilterRegistry::new(), Arc::default()).with_hooks(hooks);
    let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0", "ECHO"));

    let response = dispatcher.dispatch(&entry, "default", request(None)).await.unwrap();
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json().unwrap()["code"], codes::REQUEST_INVALID);
}
