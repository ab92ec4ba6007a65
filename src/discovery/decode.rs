//! # Discovery Payload Decoding
//!
//! Validates and decodes the JSON documents published by discovery sources.
//! A payload must be at least as long as the smallest meaningful object
//! (`{"k":0}`) and start with `{` or `[` before it is parsed at all.

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Endpoint, Service};
use crate::discovery::events::{EndpointEvent, NodeEvent, ServiceEvent};

const MIN_JSON_SIZE: usize = r#"{"k":0}"#.len();

/// Cheap structural check run before parsing
pub fn verify_json(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_JSON_SIZE {
        return false;
    }
    matches!(
        bytes.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[')
    )
}

pub fn decode_endpoint(bytes: &[u8]) -> GatewayResult<Endpoint> {
    if !verify_json(bytes) {
        return Err(GatewayError::decode("DECODE:VERIFY:JSON/invalid"));
    }
    let mut endpoint: Endpoint = serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::decode(format!("DECODE:UNMARSHAL:JSON/{}", e)))?;
    fill_service_id(&mut endpoint);
    if !endpoint.is_valid() {
        return Err(GatewayError::decode("DECODE:VERIFY:ENDPOINT/invalid"));
    }
    Ok(endpoint)
}

pub fn decode_service(bytes: &[u8]) -> GatewayResult<Service> {
    if !verify_json(bytes) {
        return Err(GatewayError::decode("DECODE:VERIFY:JSON/invalid"));
    }
    let service: Service = serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::decode(format!("DECODE:UNMARSHAL:JSON/{}", e)))?;
    if !service.is_valid() {
        return Err(GatewayError::decode("DECODE:VERIFY:SERVICE/invalid"));
    }
    Ok(service)
}

/// An endpoint embedding a valid service takes its id from that service
pub fn fill_service_id(endpoint: &mut Endpoint) {
    if endpoint.service_id.is_empty() && endpoint.service.is_valid() {
        endpoint.service_id = endpoint.service.service_id();
    }
}

pub fn to_endpoint_event(bytes: &[u8], node: NodeEvent) -> GatewayResult<EndpointEvent> {
    let endpoint = decode_endpoint(bytes)?;
    Ok(EndpointEvent::new(node.event_type(), endpoint))
}

pub fn to_service_event(bytes: &[u8], node: NodeEvent) -> GatewayResult<ServiceEvent> {
    let service = decode_service(bytes)?;
    Ok(ServiceEvent::new(node.event_type(), service))
}
