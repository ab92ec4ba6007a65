//! # NATS Discovery
//!
//! Subscribes to `<subject_prefix>.endpoint` and `<subject_prefix>.service`.
//! Each message carries one JSON document; its change kind comes from the
//! `Gateway-Event` header (`add`, `update` or `delete`, default `update`).
//!
//! ```yaml
//! discovery:
//!   nats:
//!     url: "nats://127.0.0.1:4222"
//!     subject_prefix: "gateway.discovery"
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use serde_yaml::Value;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::Configuration;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::lifecycle::Lifecycle;
use crate::discovery::decode::{to_endpoint_event, to_service_event};
use crate::discovery::events::{EndpointEvent, NodeEvent, ServiceEvent};
use crate::discovery::Discovery;

pub const NATS_DISCOVERY_ID: &str = "nats";

/// Message header carrying the change kind
pub const EVENT_HEADER: &str = "Gateway-Event";

#[derive(Debug, Clone)]
struct NatsOptions {
    url: String,
    subject_prefix: String,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            subject_prefix: "gateway.discovery".to_string(),
        }
    }
}

/// Discovery over NATS subjects
pub struct NatsDiscovery {
    id: String,
    options: RwLock<NatsOptions>,
    client: OnceCell<async_nats::Client>,
}

impl std::fmt::Debug for NatsDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsDiscovery")
            .field("id", &self.id)
            .field("options", &*self.options.read())
            .finish()
    }
}

impl Default for NatsDiscovery {
    fn default() -> Self {
        Self::new(NATS_DISCOVERY_ID)
    }
}

impl NatsDiscovery {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            options: RwLock::new(NatsOptions::default()),
            client: OnceCell::new(),
        }
    }

    pub fn subject(&self, kind: &str) -> String {
        format!("{}.{}", self.options.read().subject_prefix, kind)
    }

    async fn client(&self) -> GatewayResult<&async_nats::Client> {
        self.client
            .get_or_try_init(|| async {
                let url = self.options.read().url.clone();
                async_nats::connect(url.as_str())
                    .await
                    .map_err(|e| GatewayError::discovery(&self.id, format!("Failed to connect to NATS {}: {}", url, e)))
            })
            .await
    }

    /// Forward decoded messages of one subject until canceled
    async fn follow<E, D>(&self, cancel: CancellationToken, events: mpsc::Sender<E>, kind: &str, decode: D) -> GatewayResult<()>
    where
        E: Send,
        D: Fn(&[u8], NodeEvent) -> GatewayResult<E> + Send + Sync,
    {
        let subject = self.subject(kind);
        let mut subscriber = self
            .client()
            .await?
            .subscribe(subject.clone())
            .await
            .map_err(|e| GatewayError::discovery(&self.id, format!("Failed to subscribe {}: {}", subject, e)))?;
        info!(discovery = %self.id, subject = %subject, "DISCOVERY:NATS:SUBSCRIBED");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = subscriber.next() => {
                    let Some(message) = message else { break };
                    let node = match message.headers.as_ref().and_then(|h| h.get(EVENT_HEADER)) {
                        Some(value) => value.as_str().parse::<NodeEvent>(),
                        None => Ok(NodeEvent::NodeUpdated),
                    };
                    let event = node.and_then(|node| decode(&message.payload[..], node));
                    match event {
                        Ok(event) => {
                            debug!(discovery = %self.id, subject = %subject, "DISCOVERY:NATS:EVENT");
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(discovery = %self.id, subject = %subject, error = %e, "DISCOVERY:NATS:EVENT/invalid"),
                    }
                }
            }
        }
        if let Err(e) = subscriber.unsubscribe().await {
            debug!(discovery = %self.id, error = %e, "DISCOVERY:NATS:UNSUBSCRIBE/failed");
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for NatsDiscovery {
    async fn init(&self, config: &Configuration) -> GatewayResult<()> {
        let mut config = config.clone();
        let defaults = NatsOptions::default();
        config.set_defaults([
            ("url", Value::String(defaults.url)),
            ("subject_prefix", Value::String(defaults.subject_prefix)),
        ]);
        *self.options.write() = NatsOptions {
            url: config.get_string("url"),
            subject_prefix: config.get_string("subject_prefix"),
        };
        Ok(())
    }

    async fn startup(&self) -> GatewayResult<()> {
        self.client().await.map(|_| ())
    }
}

#[async_trait]
impl Discovery for NatsDiscovery {
    fn id(&self) -> &str {
        &self.id
    }

    async fn watch_endpoints(&self, cancel: CancellationToken, events: mpsc::Sender<EndpointEvent>) -> GatewayResult<()> {
        self.follow(cancel, events, "endpoint", to_endpoint_event).await
    }

    async fn watch_services(&self, cancel: CancellationToken, events: mpsc::Sender<ServiceEvent>) -> GatewayResult<()> {
        self.follow(cancel, events, "service", to_service_event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subjects_follow_configuration() {
        let discovery = NatsDiscovery::default();
        assert_eq!(discovery.subject("endpoint"), "gateway.discovery.endpoint");

        let config = Configuration::new(
            "discovery.nats",
            serde_yaml::from_str("subject_prefix: routes.prod").unwrap(),
        );
        discovery.init(&config).await.unwrap();
        assert_eq!(discovery.subject("service"), "routes.prod.service");
        assert_eq!(discovery.options.read().url, "nats://127.0.0.1:4222");
    }
}
