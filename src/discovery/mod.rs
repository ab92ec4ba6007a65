//! # Discovery Module
//!
//! Discovery sources watch an external store of routing metadata and publish
//! typed [`EndpointEvent`]s and [`ServiceEvent`]s. The gateway consumes both
//! streams in a single event loop, so events for a given route key are applied
//! in the order they were received.
//!
//! ## Implementations
//! - [`ResourceDiscovery`]: YAML resource files plus inline definitions, optionally watched
//! - [`NatsDiscovery`]: JSON documents published on NATS subjects
//!
//! Malformed payloads are logged and dropped; they never reach the event loop.
//!
//! ## Rust Concepts Used
//! - `#[async_trait]` for async methods on trait objects
//! - `tokio::sync::mpsc` bounded channels as event streams
//! - `CancellationToken` to stop watch tasks

pub mod decode;
pub mod events;
pub mod nats;
pub mod registry;
pub mod resource;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::GatewayResult;
use crate::core::lifecycle::Lifecycle;

pub use decode::{decode_endpoint, decode_service, to_endpoint_event, to_service_event, verify_json};
pub use events::{EndpointEvent, EventType, NodeEvent, ServiceEvent};
pub use nats::NatsDiscovery;
pub use registry::ServiceRegistry;
pub use resource::ResourceDiscovery;

/// A source of endpoint and service events
///
/// The watch methods run until the source is exhausted or `cancel` fires. The
/// gateway runs each of them on its own task.
#[async_trait]
pub trait Discovery: Lifecycle {
    /// Unique id; also the name of the discovery's configuration section
    fn id(&self) -> &str;

    async fn watch_endpoints(&self, cancel: CancellationToken, events: mpsc::Sender<EndpointEvent>) -> GatewayResult<()>;

    async fn watch_services(&self, cancel: CancellationToken, events: mpsc::Sender<ServiceEvent>) -> GatewayResult<()>;
}
