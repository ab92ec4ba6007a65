//! # Web Request and Response
//!
//! The listener turns each inbound HTTP request into a [`WebRequest`]: method,
//! URI, headers, path variables, parsed query and form values, cookies, the
//! buffered body, the peer address, a per-request variable slot and a
//! cancellation token. The dispatcher produces a [`WebResponse`] that the
//! listener converts back into an `axum` response.

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, HOST};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Content type of urlencoded form bodies
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// An inbound HTTP request, fully buffered
#[derive(Debug, Clone)]
pub struct WebRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    variables: HashMap<String, Value>,
    cancel: CancellationToken,
}

impl Default for WebRequest {
    fn default() -> Self {
        Self::new(Method::GET, Uri::from_static("/"), HeaderMap::new(), Bytes::new())
    }
}

impl WebRequest {
    /// Build a request. Query values come from the URI; form values are parsed
    /// from the body when the content type is urlencoded.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let query = uri.query().map(parse_pairs).unwrap_or_default();
        let is_form = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_ascii_lowercase().starts_with(FORM_URLENCODED))
            .unwrap_or(false);
        let form = if is_form {
            url::form_urlencoded::parse(&body)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            method,
            uri,
            headers,
            path_params: HashMap::new(),
            query,
            form,
            body,
            remote_addr: None,
            variables: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_path_params(mut self, params: HashMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Host from the `Host` header, falling back to the URI authority
    pub fn host(&self) -> String {
        self.header(HOST.as_str())
            .map(str::to_owned)
            .or_else(|| self.uri.host().map(str::to_owned))
            .unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header; names are case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_owned))
            .collect()
    }

    /// Every header as `name -> values`
    pub fn header_map(&self) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                map.entry(name.as_str().to_string()).or_default().push(value.to_string());
            }
        }
        map
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub fn query_values(&self, name: &str) -> Vec<String> {
        values_of(&self.query, name)
    }

    pub fn query_map(&self) -> HashMap<String, Vec<String>> {
        group_pairs(&self.query)
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn form_values(&self, name: &str) -> Vec<String> {
        values_of(&self.form, name)
    }

    pub fn form_map(&self) -> HashMap<String, Vec<String>> {
        group_pairs(&self.form)
    }

    /// Cookie value from the `Cookie` headers
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        self.header(CONTENT_TYPE.as_str()).unwrap_or_default()
    }

    /// Peer address as text, empty when unknown
    pub fn remote_addr(&self) -> String {
        self.remote_addr.map(|a| a.to_string()).unwrap_or_default()
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable<S: Into<String>>(&mut self, name: S, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn values_of(pairs: &[(String, String)], name: &str) -> Vec<String> {
    pairs.iter().filter(|(k, _)| k == name).map(|(_, v)| v.clone()).collect()
}

fn group_pairs(pairs: &[(String, String)]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in pairs {
        map.entry(k.clone()).or_default().push(v.clone());
    }
    map
}

/// A response produced by the dispatcher
#[derive(Debug, Clone)]
pub struct WebResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WebResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Body parsed as JSON, mainly for tests and debugging
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

impl IntoResponse for WebResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
