//! Transporters against mock backends.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;
use parking_lot::Mutex;
use rpc_gateway::arguments::{scopes, ArgumentResolver};
use rpc_gateway::context::{Context, WebRequest};
use rpc_gateway::core::error::{codes, messages, GatewayError, GatewayResult};
use rpc_gateway::core::types::{service_annotations, Argument, Endpoint, Service};
use rpc_gateway::gateway::JsonResponseWriter;
use rpc_gateway::protocols::inapp::DEBUG_ECHO_SERVICE_ID;
use rpc_gateway::protocols::rpc::{ATTACHMENT_HTTP_HEADERS, ATTACHMENT_HTTP_STATUS, VARIABLE_DISABLE_CODEC};
use rpc_gateway::protocols::{
    HttpTransporter, InAppTransporter, ReferenceConfig, RpcClient, RpcReference, RpcResult, RpcTransporter,
    Transporter,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context(method: Method, uri: &str, headers: HeaderMap, body: &'static str, service: Service) -> Context {
    let request = WebRequest::new(method, uri.parse::<Uri>().unwrap(), headers, Bytes::from_static(body.as_bytes()));
    let endpoint = Endpoint {
        service_id: service.service_id(),
        service,
        ..Default::default()
    };
    Context::new(request, endpoint)
}

#[tokio::test]
async fn http_transporter_forwards_query_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(query_param("id", "7"))
        .and(header("x-tenant", "acme"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-backend", "users")
                .set_body_json(json!({"id": 7, "name": "alice"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut service = Service::new("HTTP", "demo.UserService", "get");
    service.url = format!("{}/api/users", server.uri());
    service.arguments = vec![Argument::primitive("id", "long", scopes::QUERY)];
    let mut headers = HeaderMap::new();
    headers.insert("x-tenant", HeaderValue::from_static("acme"));
    let mut ctx = context(Method::GET, "/users?id=7&ignored=1", headers, "", service);

    let transporter = HttpTransporter::new(ArgumentResolver::default());
    transporter
        .transport(&mut ctx, &JsonResponseWriter::default())
        .await
        .unwrap();

    let response = ctx.take_response().unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.headers["x-backend"], "users");
    assert_eq!(response.json().unwrap(), json!({"id": 7, "name": "alice"}));
}

#[tokio::test]
async fn http_transporter_encodes_form_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("name=bob"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut service = Service::new("HTTP", "demo.AuthService", "login");
    service.url = format!("{}/login", server.uri());
    service.arguments = vec![Argument::primitive("user", "string", scopes::QUERY).with_http_name("name")];
    service.arguments[0].http_scope = scopes::FORM.to_string();
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/x-www-form-urlencoded"));
    let ctx = context(Method::POST, "/login", headers, "name=bob", service.clone());

    let transporter = HttpTransporter::default();
    let response = transporter.invoke_codec(&ctx, &service).await.unwrap();
    assert_eq!(response.status_code, StatusCode::OK);
}

#[tokio::test]
async fn http_backend_failure_is_bad_gateway() {
    let mut service = Service::new("HTTP", "demo.UserService", "get");
    service.url = "http://127.0.0.1:1/unreachable".to_string();
    let ctx = context(Method::GET, "/users", HeaderMap::new(), "", service.clone());

    let err = HttpTransporter::default().invoke(&ctx, &service).await.unwrap_err();
    assert_eq!(err.status_code, StatusCode::BAD_GATEWAY);
    assert_eq!(err.error_code, codes::GATEWAY_BACKEND);
    assert_eq!(err.message, messages::TRANSPORT_HTTP_INVOKE_FAILED);
}

#[derive(Debug, Clone, PartialEq)]
struct Call {
    method: String,
    types: Vec<String>,
    values: Vec<Value>,
    attachments: HashMap<String, Value>,
}

#[derive(Default)]
struct MockClient {
    refers: AtomicUsize,
    configs: Mutex<Vec<ReferenceConfig>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

struct MockReference {
    calls: Arc<Mutex<Vec<Call>>>,
}

#[async_trait]
impl RpcClient for MockClient {
    async fn refer(&self, config: &ReferenceConfig) -> GatewayResult<Arc<dyn RpcReference>> {
        self.refers.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().push(config.clone());
        Ok(Arc::new(MockReference {
            calls: Arc::clone(&self.calls),
        }))
    }
}

#[async_trait]
impl RpcReference for MockReference {
    async fn invoke(
        &self,
        method: &str,
        types: &[String],
        values: &[Value],
        attachments: &HashMap<String, Value>,
    ) -> GatewayResult<RpcResult> {
        self.calls.lock().push(Call {
            method: method.to_string(),
            types: types.to_vec(),
            values: values.to_vec(),
            attachments: attachments.clone(),
        });
        let mut result_attachments = HashMap::new();
        result_attachments.insert(ATTACHMENT_HTTP_STATUS.to_string(), json!("201"));
        result_attachments.insert(ATTACHMENT_HTTP_HEADERS.to_string(), json!({"x-trace": ["t1"]}));
        result_attachments.insert("backend.node".to_string(), json!("node-1"));
        Ok(RpcResult {
            value: json!({"echo": values}),
            attachments: result_attachments,
        })
    }
}

struct FailingClient;

#[async_trait]
impl RpcClient for FailingClient {
    async fn refer(&self, config: &ReferenceConfig) -> GatewayResult<Arc<dyn RpcReference>> {
        Err(GatewayError::transporter("DUBBO", format!("no provider for {}", config.interface)))
    }
}

fn rpc_service() -> Service {
    let mut service = Service::new("DUBBO", "demo.UserService", "get");
    service.url = "127.0.0.1:20880".to_string();
    service.arguments = vec![Argument::primitive("id", "long", scopes::QUERY)];
    service.annotations.insert(service_annotations::RPC_GROUP, json!("blue"));
    service.annotations.insert(service_annotations::RPC_VERSION, json!("1.0.0"));
    service.annotations.insert(service_annotations::RPC_TIMEOUT, json!("250ms"));
    service
}

#[tokio::test]
async fn rpc_transporter_decodes_generic_result() {
    let client = Arc::new(MockClient::default());
    let transporter = RpcTransporter::new(client.clone(), ArgumentResolver::default());
    let service = rpc_service();
    let mut ctx = context(Method::GET, "/users?id=7", HeaderMap::new(), "", service.clone());
    ctx.set_attribute("tenant", json!("acme"));

    let response = transporter.invoke_codec(&ctx, &service).await.unwrap();
    assert_eq!(response.status_code, StatusCode::CREATED);
    assert_eq!(response.headers["x-trace"], "t1");

    transporter.invoke_codec(&ctx, &service).await.unwrap();
    assert_eq!(client.refers.load(Ordering::SeqCst), 1);
    assert_eq!(transporter.reference_count().await, 1);

    let config = client.configs.lock()[0].clone();
    assert_eq!(config.url, "dubbo://127.0.0.1:20880");
    assert_eq!(config.group, "blue");
    assert_eq!(config.version, "1.0.0");
    assert_eq!(config.timeout, std::time::Duration::from_millis(250));

    let calls = client.calls.lock().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, "get");
    assert_eq!(calls[0].types, vec!["long".to_string()]);
    assert_eq!(calls[0].values, vec![json!(7)]);
    assert_eq!(calls[0].attachments["tenant"], json!("acme"));
}

#[tokio::test]
async fn transport_exposes_response_attachments_as_attributes() {
    let transporter = RpcTransporter::new(Arc::new(MockClient::default()), ArgumentResolver::default());
    let mut ctx = context(Method::GET, "/users?id=3", HeaderMap::new(), "", rpc_service());

    transporter
        .transport(&mut ctx, &JsonResponseWriter::default())
        .await
        .unwrap();

    assert_eq!(ctx.attribute("backend.node"), Some(json!("node-1")));
    assert!(ctx.attribute(ATTACHMENT_HTTP_STATUS).is_none());
    assert_eq!(ctx.take_response().unwrap().status, StatusCode::CREATED);
}

#[tokio::test]
async fn rpc_codec_can_be_disabled_per_request() {
    let transporter = RpcTransporter::new(Arc::new(MockClient::default()), ArgumentResolver::default());
    let service = rpc_service();
    let mut ctx = context(Method::GET, "/users?id=1", HeaderMap::new(), "", service.clone());
    ctx.set_variable(VARIABLE_DISABLE_CODEC, json!(true));

    let response = transporter.invoke_codec(&ctx, &service).await.unwrap();
    assert_eq!(response.status_code, StatusCode::OK);
    assert!(response.attachments.contains_key(ATTACHMENT_HTTP_STATUS));
}

#[tokio::test]
async fn rpc_reference_failure_is_internal() {
    let transporter = RpcTransporter::new(Arc::new(FailingClient), ArgumentResolver::default());
    let service = rpc_service();
    let ctx = context(Method::GET, "/users?id=1", HeaderMap::new(), "", service.clone());

    let err = transporter.invoke(&ctx, &service).await.unwrap_err();
    assert_eq!(err.error_code, codes::GATEWAY_INTERNAL);
    assert_eq!(err.message, messages::TRANSPORT_RPC_ASSEMBLE_FAILED);
}

#[tokio::test]
async fn rpc_unresolvable_argument_is_invalid_request() {
    let transporter = RpcTransporter::new(Arc::new(MockClient::default()), ArgumentResolver::default());
    let service = rpc_service();
    let ctx = context(Method::GET, "/users?id=seven", HeaderMap::new(), "", service.clone());

    let err = transporter.invoke(&ctx, &service).await.unwrap_err();
    assert_eq!(err.status_code, StatusCode::BAD_REQUEST);
    assert_eq!(err.error_code, codes::REQUEST_INVALID);
}

#[tokio::test]
async fn inapp_debug_echo() {
    let transporter = InAppTransporter::default();
    let service = Service::new("INAPP", "gateway.debug.inapp.Test", "echo");
    assert_eq!(service.service_id(), DEBUG_ECHO_SERVICE_ID);
    let mut ctx = context(Method::POST, "/debug", HeaderMap::new(), "ping", service);

    transporter
        .transport(&mut ctx, &JsonResponseWriter::default())
        .await
        .unwrap();
    let body = ctx.take_response().unwrap().json().unwrap();
    assert_eq!(body["request-body"], "ping");
    assert_eq!(body["request-method"], "POST");
}
