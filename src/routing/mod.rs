//! # Routing
//!
//! The dynamic, multi-version routing table fed by discovery events, and the
//! endpoint selection applied to each request.

pub mod selector;
pub mod table;

pub use selector::{header_version_locator, EndpointLocator, EndpointSelector, VersionLocator};
pub use table::{make_route_key, MultiVersionEndpoint, RoutingTable};
