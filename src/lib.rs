//! # RPC Gateway Library
//!
//! An HTTP to RPC gateway whose routes are driven by discovery events. HTTP
//! requests are matched to versioned endpoints, run through a filter chain and
//! forwarded to backend services over a pluggable transporter per protocol.
//!
//! ## Request path
//! 1. A [`gateway::listener::WebListener`] matches method and pattern and hands the
//!    request to the handler bound for that route key
//! 2. The [`gateway::Dispatcher`] picks the endpoint version from the
//!    [`routing::RoutingTable`] entry and binds a pooled [`context::Context`]
//! 3. The filter chain runs, ending in the transporter of the service protocol
//! 4. Backend arguments are resolved from the request by the
//!    [`arguments::ArgumentResolver`]
//!
//! ## Control path
//! [`discovery::Discovery`] sources publish endpoint and service events which a
//! single event loop in [`gateway::DispatcherManager`] applies to the routing
//! table and the service registry.

/// Error types, configuration, the routing metadata model and component lifecycle
pub mod core;

/// Per-request context and the inbound request/response types
pub mod context;

/// Argument lookup and type resolution
pub mod arguments;

/// Multi-version routing table and endpoint selection
pub mod routing;

/// Discovery sources and their event types
pub mod discovery;

/// Backend transporters, one per protocol
pub mod protocols;

/// Request filters and the filter chain
pub mod middleware;

/// Listeners, dispatcher, response writer and composition root
pub mod gateway;

/// Structured logging and metrics
pub mod observability;

pub use crate::core::{Configuration, GatewayConfig, GatewayError, GatewayResult, ServeError, ServeResult};
pub use crate::core::{Endpoint, Lifecycle, Service};
pub use crate::gateway::{Dispatcher, DispatcherManager, GatewayBuilder};
pub use crate::routing::RoutingTable;
