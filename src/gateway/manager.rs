//! # Gateway Composition
//!
//! [`GatewayBuilder`] collects the components of a gateway (transporters,
//! discoveries, listeners, filters, selectors) and initializes each one with
//! its configuration section. [`DispatcherManager`] owns the running gateway:
//! it starts the components in order, then runs the discovery event loop.
//!
//! ## Event loop
//! Every discovery publishes into two bounded channels, one for endpoints and
//! one for services. A single task consumes both, so the routing table and the
//! service registry are only mutated from one place and events for a route key
//! apply in arrival order. Service events are polled first.
//!
//! When an endpoint event creates a new route key, the route is bound once on
//! the listener selected by the endpoint. Later versions reuse that binding.
//!
//! ## Rust Concepts Used
//! - Generic registration (`with_transporter<T: Transporter + 'static>`) so one
//!   `Arc` is stored both as a lifecycle hook and as its trait object
//! - `tokio::select!` with `biased;` for deterministic channel priority
//! - `CancellationToken` fan-out to every background task

use axum::http::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::arguments::ArgumentResolver;
use crate::core::config::{Configuration, GatewayConfig};
use crate::core::error::GatewayResult;
use crate::core::lifecycle::{Lifecycle, LifecycleHooks};
use crate::core::types::{endpoint_annotations, Endpoint, Service};
use crate::discovery::{Discovery, EndpointEvent, EventType, ServiceEvent, ServiceRegistry};
use crate::gateway::dispatcher::{DispatchHooks, Dispatcher, EndpointHandler};
use crate::gateway::listener::WebListener;
use crate::gateway::writer::{JsonResponseWriter, ResponseWriter};
use crate::middleware::filter::{Filter, FilterRegistry, FilterSelector};
use crate::protocols::{Transporter, TransporterRegistry};
use crate::routing::{
    header_version_locator, make_route_key, EndpointLocator, EndpointSelector, MultiVersionEndpoint, RoutingTable,
};

/// HTTP methods an endpoint may bind
pub const ALLOWED_METHODS: [&str; 8] = ["GET", "POST", "DELETE", "PUT", "HEAD", "OPTIONS", "PATCH", "TRACE"];

const EVENT_CHANNEL_CAPACITY: usize = 2;

/// Collects and initializes gateway components
pub struct GatewayBuilder {
    config: GatewayConfig,
    table: Arc<RoutingTable>,
    services: Arc<ServiceRegistry>,
    resolver: ArgumentResolver,
    transporters: Arc<TransporterRegistry>,
    discoveries: Vec<Arc<dyn Discovery>>,
    listeners: HashMap<String, Arc<dyn WebListener>>,
    filters: Vec<Arc<dyn Filter>>,
    disabled_filters: Vec<String>,
    filter_selectors: Vec<Arc<dyn FilterSelector>>,
    endpoint_selectors: Vec<Arc<dyn EndpointSelector>>,
    hooks: DispatchHooks,
    lifecycle: LifecycleHooks,
    inits: Vec<(String, Arc<dyn Lifecycle>, Configuration)>,
    writer: Option<Arc<dyn ResponseWriter>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            table: Arc::new(RoutingTable::new()),
            services: Arc::new(ServiceRegistry::new()),
            resolver: ArgumentResolver::default(),
            transporters: Arc::new(TransporterRegistry::new()),
            discoveries: Vec::new(),
            listeners: HashMap::new(),
            filters: Vec::new(),
            disabled_filters: Vec::new(),
            filter_selectors: Vec::new(),
            endpoint_selectors: Vec::new(),
            hooks: DispatchHooks::default(),
            lifecycle: LifecycleHooks::new(),
            inits: Vec::new(),
            writer: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Shared service registry, for components that look services up
    pub fn services(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.services)
    }

    pub fn resolver(&self) -> ArgumentResolver {
        self.resolver.clone()
    }

    pub fn transporters(&self) -> Arc<TransporterRegistry> {
        Arc::clone(&self.transporters)
    }

    pub fn table(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.table)
    }

    /// Replace the argument resolver handed out by [`GatewayBuilder::resolver`]
    pub fn with_resolver(mut self, resolver: ArgumentResolver) -> Self {
        self.resolver = resolver;
        self
    }

    fn register_lifecycle(&mut self, name: String, component: Arc<dyn Lifecycle>, config: Configuration) {
        self.lifecycle.register(name.clone(), Arc::clone(&component));
        self.inits.push((name, component, config));
    }

    pub fn with_transporter<T: Transporter + 'static>(mut self, transporter: Arc<T>) -> Self {
        let protocol = transporter.protocol().to_string();
        let config = self.config.transporter_config(&protocol);
        self.register_lifecycle(format!("transporter:{}", protocol), transporter.clone(), config);
        self.transporters.register(transporter);
        self
    }

    /// Register a discovery source; a disabled section skips it entirely
    pub fn with_discovery<T: Discovery + 'static>(mut self, discovery: Arc<T>) -> Self {
        let id = discovery.id().to_string();
        let config = self.config.discovery_config(&id);
        if config.is_disabled() {
            info!(discovery = %id, "DISCOVERY:REGISTER/disabled");
            return self;
        }
        self.register_lifecycle(format!("discovery:{}", id), discovery.clone(), config);
        self.discoveries.push(discovery);
        self
    }

    pub fn with_listener<T: WebListener + 'static>(mut self, listener: Arc<T>) -> Self {
        let id = listener.listener_id().to_string();
        let config = Configuration::empty(format!("listeners.{}", id));
        self.register_lifecycle(format!("listener:{}", id), listener.clone(), config);
        self.listeners.insert(id, listener);
        self
    }

    /// Register a global filter; a disabled section skips it and keeps it out
    /// of selector results
    pub fn with_filter<T: Filter + 'static>(mut self, filter: Arc<T>) -> Self {
        let id = filter.filter_id().to_string();
        let config = self.config.filter_config(&id);
        if config.is_disabled() {
            info!(filter = %id, "FILTER:REGISTER/disabled");
            self.disabled_filters.push(id);
            return self;
        }
        self.register_lifecycle(format!("filter:{}", id), filter.clone(), config);
        self.filters.push(filter);
        self
    }

    pub fn with_filter_selector(mut self, selector: Arc<dyn FilterSelector>) -> Self {
        self.filter_selectors.push(selector);
        self
    }

    pub fn with_endpoint_selector(mut self, selector: Arc<dyn EndpointSelector>) -> Self {
        self.endpoint_selectors.push(selector);
        self
    }

    pub fn with_hooks(mut self, hooks: DispatchHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn ResponseWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Initialize every component and assemble the dispatcher
    pub async fn build(self) -> GatewayResult<DispatcherManager> {
        for (name, component, config) in &self.inits {
            debug!(component = %name, namespace = %config.namespace(), "LIFECYCLE:INIT");
            component.init(config).await?;
        }

        let mut filters = FilterRegistry::new();
        for id in self.disabled_filters {
            filters.disable(id);
        }
        for filter in self.filters {
            filters.add_global(filter);
        }
        for selector in self.filter_selectors {
            filters.add_selector(selector);
        }

        let dispatcher_config = &self.config.dispatcher;
        let writer = self.writer.unwrap_or_else(|| {
            Arc::new(JsonResponseWriter::new(
                &dispatcher_config.writer_id,
                dispatcher_config.debug_errors,
            ))
        });
        let locator = EndpointLocator::new(
            self.endpoint_selectors,
            header_version_locator(dispatcher_config.version_header.clone()),
        );
        let dispatcher = Arc::new(
            Dispatcher::new(
                locator,
                Arc::new(filters),
                Arc::clone(&self.transporters),
                writer,
                dispatcher_config.context_pool_size,
            )
            .with_hooks(self.hooks),
        );

        let handler = Arc::new(EventHandler::new(
            Arc::clone(&self.table),
            Arc::clone(&self.services),
            self.listeners,
            Arc::clone(&dispatcher),
        ));
        info!(
            components = ?self.lifecycle.names(),
            transporters = ?self.transporters.protocols(),
            "GATEWAY:BUILT"
        );

        Ok(DispatcherManager {
            dispatcher,
            handler,
            discoveries: self.discoveries,
            lifecycle: self.lifecycle,
            cancel: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

/// The running gateway: lifecycle of the components plus the event loop
pub struct DispatcherManager {
    dispatcher: Arc<Dispatcher>,
    handler: Arc<EventHandler>,
    discoveries: Vec<Arc<dyn Discovery>>,
    lifecycle: LifecycleHooks,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl DispatcherManager {
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn event_handler(&self) -> Arc<EventHandler> {
        Arc::clone(&self.handler)
    }

    pub fn table(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.handler.table)
    }

    /// Start every component, then the event loop and the discovery watches
    pub async fn startup(&self) -> GatewayResult<()> {
        self.lifecycle.startup().await?;

        let (endpoint_tx, endpoint_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (service_tx, service_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut tasks = Vec::with_capacity(1 + self.discoveries.len() * 2);
        tasks.push(tokio::spawn(run_event_loop(
            Arc::clone(&self.handler),
            endpoint_rx,
            service_rx,
            self.cancel.clone(),
        )));

        for discovery in &self.discoveries {
            let source = Arc::clone(discovery);
            let cancel = self.cancel.clone();
            let events = service_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = source.watch_services(cancel, events).await {
                    error!(discovery = %source.id(), error = %e, "DISCOVERY:WATCH:SERVICES/failed");
                }
            }));

            let source = Arc::clone(discovery);
            let cancel = self.cancel.clone();
            let events = endpoint_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = source.watch_endpoints(cancel, events).await {
                    error!(discovery = %source.id(), error = %e, "DISCOVERY:WATCH:ENDPOINTS/failed");
                }
            }));
        }
        self.tasks.lock().extend(tasks);
        info!(discoveries = self.discoveries.len(), "GATEWAY:STARTED");
        Ok(())
    }

    /// Stop the background tasks, then every component in reverse order
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "GATEWAY:TASK/failed");
            }
        }
        self.lifecycle.shutdown().await;
        info!("GATEWAY:STOPPED");
    }
}

async fn run_event_loop(
    handler: Arc<EventHandler>,
    mut endpoints: mpsc::Receiver<EndpointEvent>,
    mut services: mpsc::Receiver<ServiceEvent>,
    cancel: CancellationToken,
) {
    debug!("EVENT:LOOP:STARTED");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(event) = services.recv() => handler.on_service_event(event),
            Some(event) = endpoints.recv() => handler.on_endpoint_event(event),
        }
    }
    debug!("EVENT:LOOP:STOPPED");
}

/// Applies discovery events to the routing table and the service registry
pub struct EventHandler {
    table: Arc<RoutingTable>,
    services: Arc<ServiceRegistry>,
    listeners: HashMap<String, Arc<dyn WebListener>>,
    dispatcher: Arc<Dispatcher>,
}

impl EventHandler {
    pub fn new(
        table: Arc<RoutingTable>,
        services: Arc<ServiceRegistry>,
        listeners: HashMap<String, Arc<dyn WebListener>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            table,
            services,
            listeners,
            dispatcher,
        }
    }

    pub fn on_endpoint_event(&self, event: EndpointEvent) {
        let EndpointEvent { event_type, mut endpoint } = event;
        let method = endpoint.http_method.to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            warn!(method = %endpoint.http_method, pattern = %endpoint.http_pattern, "EVENT:ENDPOINT:METHOD/unsupported");
            return;
        }
        let route_key = make_route_key(&method, &endpoint.http_pattern);
        debug!(event = %event_type, route = %route_key, version = %endpoint.version, "EVENT:ENDPOINT");

        match event_type {
            EventType::Added | EventType::Updated => {
                self.fill_service(&mut endpoint);
                let version = endpoint.version.clone();
                let (entry, created) = self.table.register_or_get(&route_key, &endpoint);
                if created {
                    self.bind(&method, &endpoint, Arc::clone(&entry));
                } else {
                    entry.update(&version, endpoint);
                }
            }
            EventType::Removed => {
                if let Some(entry) = self.table.get(&route_key) {
                    entry.delete(&endpoint.version);
                }
            }
        }
    }

    pub fn on_service_event(&self, event: ServiceEvent) {
        let ServiceEvent { event_type, service } = event;
        debug!(event = %event_type, service = %service.service_id(), alias = %service.alias_id, "EVENT:SERVICE");
        match event_type {
            EventType::Added | EventType::Updated => {
                self.services.register(service.clone());
                self.sync_endpoints(&service);
            }
            EventType::Removed => self.services.remove(&service),
        }
    }

    /// Copy the registered service into the endpoint unless it is static
    fn fill_service(&self, endpoint: &mut Endpoint) {
        if endpoint.annotation(endpoint_annotations::STATIC_MODEL).get_bool() {
            return;
        }
        match self.services.by_id(&endpoint.service_id) {
            Some(service) => endpoint.service = service,
            None if endpoint.service.is_valid() => {}
            None => debug!(service = %endpoint.service_id, "EVENT:ENDPOINT:SERVICE/pending"),
        }
    }

    /// Refresh every endpoint that targets `service` by id or alias
    fn sync_endpoints(&self, service: &Service) {
        let id = service.service_id();
        let matches = |target: &str| !target.is_empty() && (target == id || target == service.alias_id);
        for (route_key, entry) in self.table.entries() {
            for (version, mut endpoint) in entry.endpoints() {
                if !matches(&endpoint.service_id)
                    || endpoint.annotation(endpoint_annotations::STATIC_MODEL).get_bool()
                {
                    continue;
                }
                endpoint.service = service.clone();
                entry.update(&version, endpoint);
                debug!(route = %route_key, version = %version, service = %id, "EVENT:SERVICE:ENDPOINT/synced");
            }
        }
    }

    fn bind(&self, method: &str, endpoint: &Endpoint, entry: Arc<MultiVersionEndpoint>) {
        let listener_id = endpoint.listener_id();
        let Some(listener) = self.listeners.get(&listener_id) else {
            error!(listener = %listener_id, pattern = %endpoint.http_pattern, "EVENT:ENDPOINT:LISTENER/notfound");
            return;
        };
        let method = match Method::from_bytes(method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                warn!(method = %method, error = %e, "EVENT:ENDPOINT:METHOD/invalid");
                return;
            }
        };
        let handler = Arc::new(EndpointHandler::new(Arc::clone(&self.dispatcher), entry, listener_id.clone()));
        match listener.add_handler(&method, &endpoint.http_pattern, handler) {
            Ok(()) => info!(listener = %listener_id, method = %method, pattern = %endpoint.http_pattern, "EVENT:ENDPOINT:BIND"),
            Err(e) => error!(listener = %listener_id, error = %e, "EVENT:ENDPOINT:BIND/failed"),
        }
    }
}
