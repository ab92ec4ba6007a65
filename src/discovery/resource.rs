//! # Resource Discovery
//!
//! Reads endpoints and services from YAML resource files listed in `includes`,
//! plus any defined inline in the discovery's own configuration section:
//!
//! ```yaml
//! discovery:
//!   resource:
//!     watch: true
//!     includes: ["conf.d/user-endpoints.yaml"]
//!     services:
//!       - { protocol: ECHO, interface: demo.EchoService, method: echo }
//!     endpoints:
//!       - { version: "1.0", httpMethod: GET, httpPattern: /echo, serviceId: "demo.EchoService:echo" }
//! ```
//!
//! Every resource is published as an `Added` event at startup. With `watch`
//! enabled the include files are watched with `notify`; on change they are
//! re-read and the difference is published as `Added`, `Updated` and `Removed`
//! events. Invalid entries are skipped with a warning.

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::Configuration;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::lifecycle::Lifecycle;
use crate::core::types::{Endpoint, Service};
use crate::discovery::decode::fill_service_id;
use crate::discovery::events::{EndpointEvent, EventType, ServiceEvent};
use crate::discovery::Discovery;
use crate::routing::make_route_key;

pub const RESOURCE_DISCOVERY_ID: &str = "resource";

/// Delay letting editors finish writing before a changed file is re-read
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Layout of a resource file and of the inline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ResourceDocument {
    endpoints: Vec<serde_yaml::Value>,
    services: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default)]
struct ResourceOptions {
    includes: Vec<PathBuf>,
    watch: bool,
    inline: ResourceDocument,
}

/// Valid resources loaded from every source
#[derive(Debug, Default)]
struct ResourceSet {
    endpoints: Vec<Endpoint>,
    services: Vec<Service>,
}

impl ResourceSet {
    fn absorb(&mut self, document: ResourceDocument, source: &str) {
        for value in document.endpoints {
            match serde_yaml::from_value::<Endpoint>(value) {
                Ok(mut endpoint) => {
                    fill_service_id(&mut endpoint);
                    if endpoint.is_valid() {
                        self.endpoints.push(endpoint);
                    } else {
                        warn!(source, pattern = %endpoint.http_pattern, "DISCOVERY:RESOURCE:ENDPOINT/invalid");
                    }
                }
                Err(e) => warn!(source, error = %e, "DISCOVERY:RESOURCE:ENDPOINT/decode"),
            }
        }
        for value in document.services {
            match serde_yaml::from_value::<Service>(value) {
                Ok(service) if service.is_valid() => self.services.push(service),
                Ok(service) => warn!(source, service_id = %service.service_id(), "DISCOVERY:RESOURCE:SERVICE/invalid"),
                Err(e) => warn!(source, error = %e, "DISCOVERY:RESOURCE:SERVICE/decode"),
            }
        }
    }

    fn keyed_endpoints(self) -> HashMap<String, Endpoint> {
        self.endpoints
            .into_iter()
            .map(|e| (format!("{}@{}", make_route_key(&e.http_method, &e.http_pattern), e.version), e))
            .collect()
    }

    fn keyed_services(self) -> HashMap<String, Service> {
        self.services.into_iter().map(|s| (s.service_id(), s)).collect()
    }
}

/// Discovery over local YAML resources
#[derive(Debug)]
pub struct ResourceDiscovery {
    id: String,
    options: RwLock<ResourceOptions>,
}

impl Default for ResourceDiscovery {
    fn default() -> Self {
        Self::new(RESOURCE_DISCOVERY_ID)
    }
}

impl ResourceDiscovery {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            options: RwLock::new(ResourceOptions::default()),
        }
    }

    async fn load(&self) -> GatewayResult<ResourceSet> {
        let options = self.options.read().clone();
        let mut set = ResourceSet::default();
        for path in &options.includes {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                GatewayError::discovery(&self.id, format!("Failed to read resource {}: {}", path.display(), e))
            })?;
            let document: ResourceDocument = serde_yaml::from_str(&content).map_err(|e| {
                GatewayError::discovery(&self.id, format!("Failed to parse resource {}: {}", path.display(), e))
            })?;
            set.absorb(document, &path.display().to_string());
        }
        set.absorb(options.inline, "inline");
        Ok(set)
    }

    /// Watch the include files; events arrive on the returned channel while the
    /// watcher is alive
    fn watch_includes(&self) -> GatewayResult<(RecommendedWatcher, mpsc::UnboundedReceiver<Event>)> {
        let includes = self.options.read().includes.clone();
        let names: HashSet<OsString> = includes.iter().filter_map(|p| p.file_name().map(OsString::from)).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let relevant = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| names.contains(n)).unwrap_or(false));
                if relevant {
                    let _ = tx.send(event);
                }
            }
        })
        .map_err(|e| GatewayError::discovery(&self.id, format!("Failed to create file watcher: {}", e)))?;

        let dirs: HashSet<PathBuf> = includes
            .iter()
            .map(|p| match p.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            })
            .collect();
        for dir in dirs {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| GatewayError::discovery(&self.id, format!("Failed to watch {}: {}", dir.display(), e)))?;
        }
        Ok((watcher, rx))
    }

    /// Publish the initial resources, then follow file changes until canceled
    async fn publish<T, E, K, M>(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<E>,
        keyed: K,
        make: M,
    ) -> GatewayResult<()>
    where
        T: Clone + PartialEq + Send,
        E: Send,
        K: Fn(ResourceSet) -> HashMap<String, T> + Send + Sync,
        M: Fn(EventType, T) -> E + Send + Sync,
    {
        let mut current = keyed(self.load().await?);
        for resource in current.values() {
            if events.send(make(EventType::Added, resource.clone())).await.is_err() {
                return Ok(());
            }
        }

        if !self.options.read().watch {
            return Ok(());
        }
        let (_watcher, mut changes) = self.watch_includes()?;
        info!(discovery = %self.id, "DISCOVERY:RESOURCE:WATCH/started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => {
                    let Some(change) = change else { break };
                    if !matches!(change.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                        continue;
                    }
                    tokio::time::sleep(RELOAD_DEBOUNCE).await;
                    while changes.try_recv().is_ok() {}

                    let next = match self.load().await {
                        Ok(set) => keyed(set),
                        Err(e) => {
                            warn!(discovery = %self.id, error = %e, "DISCOVERY:RESOURCE:RELOAD/failed");
                            continue;
                        }
                    };
                    let mut diff = Vec::new();
                    for (key, resource) in &next {
                        match current.get(key) {
                            None => diff.push(make(EventType::Added, resource.clone())),
                            Some(old) if old != resource => diff.push(make(EventType::Updated, resource.clone())),
                            Some(_) => {}
                        }
                    }
                    for (key, resource) in &current {
                        if !next.contains_key(key) {
                            diff.push(make(EventType::Removed, resource.clone()));
                        }
                    }
                    debug!(discovery = %self.id, changes = diff.len(), "DISCOVERY:RESOURCE:RELOAD");
                    current = next;
                    for event in diff {
                        if events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for ResourceDiscovery {
    async fn init(&self, config: &Configuration) -> GatewayResult<()> {
        let inline: ResourceDocument = config.deserialize()?;
        let includes = config.get_string_list("includes").into_iter().map(PathBuf::from).collect::<Vec<_>>();
        info!(discovery = %self.id, includes = includes.len(), "DISCOVERY:RESOURCE:INIT");
        *self.options.write() = ResourceOptions {
            includes,
            watch: config.get_bool("watch"),
            inline,
        };
        Ok(())
    }
}

#[async_trait]
impl Discovery for ResourceDiscovery {
    fn id(&self) -> &str {
        &self.id
    }

    async fn watch_endpoints(&self, cancel: CancellationToken, events: mpsc::Sender<EndpointEvent>) -> GatewayResult<()> {
        self.publish(cancel, events, ResourceSet::keyed_endpoints, EndpointEvent::new)
            .await
    }

    async fn watch_services(&self, cancel: CancellationToken, events: mpsc::Sender<ServiceEvent>) -> GatewayResult<()> {
        self.publish(cancel, events, ResourceSet::keyed_services, ServiceEvent::new)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INLINE: &str = r#"
services:
  - { protocol: ECHO, interface: demo.EchoService, method: echo }
  - { protocol: ECHO, interface: "", method: broken }
endpoints:
  - { version: "1.0", httpMethod: GET, httpPattern: /echo, serviceId: "demo.EchoService:echo" }
  - { version: "1.0", httpMethod: GET }
"#;

    #[tokio::test]
    async fn test_inline_resources_skip_invalid_entries() {
        let discovery = ResourceDiscovery::default();
        let config = Configuration::new("discovery.resource", serde_yaml::from_str(INLINE).unwrap());
        discovery.init(&config).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        discovery.watch_services(CancellationToken::new(), tx).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.service.service_id(), "demo.EchoService:echo");
        assert!(rx.recv().await.is_none());

        let (tx, mut rx) = mpsc::channel(8);
        discovery.watch_endpoints(CancellationToken::new(), tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().endpoint.http_pattern, "/echo");
        assert!(rx.recv().await.is_none());
    }
}
