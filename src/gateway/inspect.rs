//! # Inspection Routes
//!
//! Read-only JSON views over the live routing table and service registry:
//!
//! - `GET /debug/endpoints`: every route key with its versions. The query
//!   parameters `application`, `protocol`, `http-pattern` (alias `pattern`) and
//!   `interface` narrow the result. A route is kept when any given parameter is
//!   a case-insensitive substring of the matching field of one of its versions.
//! - `GET /debug/services?service-id=..` (alias `service`): one service by id or alias id
//!
//! Both routes sit behind HTTP Basic auth. Without a configured password a
//! random one is generated at startup and logged.
//!
//! ## Rust Concepts Used
//! - axum `State` and `Query` extractors over `Arc`-shared tables
//! - `ValidateRequestHeaderLayer::basic` applied as a route layer

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::validate_request::ValidateRequestHeaderLayer;
use tracing::info;

use crate::core::config::InspectConfig;
use crate::core::types::Endpoint;
use crate::discovery::ServiceRegistry;
use crate::routing::RoutingTable;

pub const ENDPOINTS_PATH: &str = "/debug/endpoints";
pub const SERVICES_PATH: &str = "/debug/services";

const ENDPOINT_FILTER_KEYS: [&str; 5] = ["application", "protocol", "http-pattern", "pattern", "interface"];
const SERVICE_ID_KEYS: [&str; 2] = ["service-id", "service"];
const GENERATED_PASSWORD_LEN: usize = 8;

/// Tables exposed by the inspection routes
#[derive(Clone)]
pub struct InspectState {
    pub table: Arc<RoutingTable>,
    pub services: Arc<ServiceRegistry>,
}

pub struct InspectRouter;

impl InspectRouter {
    /// Build the authenticated inspection router
    pub fn create_router(state: InspectState, config: &InspectConfig) -> Router {
        let password = if config.password.is_empty() {
            let generated = generate_password();
            info!(username = %config.username, password = %generated, "INSPECT:AUTH/generated");
            generated
        } else {
            config.password.clone()
        };
        info!(listener = %config.listener, paths = ?[ENDPOINTS_PATH, SERVICES_PATH], "INSPECT:ENABLED");

        Router::new()
            .route(ENDPOINTS_PATH, get(inspect_endpoints))
            .route(SERVICES_PATH, get(inspect_services))
            .route_layer(ValidateRequestHeaderLayer::basic(&config.username, &password))
            .with_state(state)
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

async fn inspect_endpoints(
    State(state): State<InspectState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<BTreeMap<String, BTreeMap<String, Endpoint>>> {
    let filters: Vec<(&str, String)> = ENDPOINT_FILTER_KEYS
        .iter()
        .filter_map(|key| {
            params
                .get(*key)
                .filter(|value| !value.is_empty())
                .map(|value| (*key, value.to_lowercase()))
        })
        .collect();

    let mut result = BTreeMap::new();
    for (route_key, entry) in state.table.entries() {
        let versions = entry.endpoints();
        if versions.is_empty() {
            continue;
        }
        let selected = filters.is_empty()
            || versions.values().any(|endpoint| {
                filters
                    .iter()
                    .any(|(key, needle)| endpoint_field(endpoint, key).to_lowercase().contains(needle.as_str()))
            });
        if selected {
            result.insert(route_key, versions.into_iter().collect());
        }
    }
    Json(result)
}

fn endpoint_field<'a>(endpoint: &'a Endpoint, key: &str) -> &'a str {
    match key {
        "application" => &endpoint.application,
        "protocol" => &endpoint.service.protocol,
        "interface" => &endpoint.service.interface,
        _ => &endpoint.http_pattern,
    }
}

async fn inspect_services(
    State(state): State<InspectState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let id = SERVICE_ID_KEYS
        .iter()
        .find_map(|key| params.get(*key).filter(|value| !value.is_empty()));
    let Some(id) = id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "failed", "message": "param is required: service-id"})),
        )
            .into_response();
    };
    match state.services.by_id(id) {
        Some(service) => Json(service).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "failed", "message": "service not found", "service-id": id})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_password() {
        let password = generate_password();
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
