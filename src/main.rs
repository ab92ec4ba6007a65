//! # RPC Gateway - Main Entry Point
//!
//! Loads the configuration, installs logging and metrics, registers the
//! built-in components and serves until Ctrl+C.
//!
//! The configuration path is the first argument, else `GATEWAY_CONFIG`. Without
//! either the defaults are used: one listener on `0.0.0.0:8080`.

use anyhow::Context as _;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use rpc_gateway::core::types::protocols;
use rpc_gateway::discovery::nats::NATS_DISCOVERY_ID;
use rpc_gateway::discovery::{NatsDiscovery, ResourceDiscovery};
use rpc_gateway::gateway::{AxumListener, GatewayBuilder, InspectRouter, InspectState, JsonResponseWriter};
use rpc_gateway::middleware::{PermissionFilter, TransporterPermissionVerifier};
use rpc_gateway::observability::{init_logging, install_prometheus};
use rpc_gateway::protocols::{EchoTransporter, HttpTransporter, InAppTransporter, RpcTransporter, TripleRpcClient};
use rpc_gateway::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_logging(&config.observability.logging);
    install_prometheus(&config.observability.metrics).context("failed to install metrics exporter")?;
    info!(version = env!("CARGO_PKG_VERSION"), "GATEWAY:STARTING");

    let writer = JsonResponseWriter::new(&config.dispatcher.writer_id, config.dispatcher.debug_errors);
    let mut builder = GatewayBuilder::new(config.clone());
    let resolver = builder.resolver();
    builder = builder
        .with_transporter(Arc::new(RpcTransporter::new(
            Arc::new(TripleRpcClient::default()),
            resolver.clone(),
        )))
        .with_transporter(Arc::new(HttpTransporter::new(resolver)))
        .with_transporter(Arc::new(EchoTransporter::default()))
        .with_transporter(Arc::new(InAppTransporter::default()))
        .with_discovery(Arc::new(ResourceDiscovery::default()));
    if config.discovery.contains_key(NATS_DISCOVERY_ID) {
        builder = builder.with_discovery(Arc::new(NatsDiscovery::default()));
    }

    let verifier = Arc::new(TransporterPermissionVerifier::new(builder.transporters()));
    let services = builder.services();
    builder = builder.with_filter(Arc::new(PermissionFilter::new(services, verifier)));
    let inspect = config.inspect.enabled.then(|| {
        let state = InspectState {
            table: builder.table(),
            services: builder.services(),
        };
        InspectRouter::create_router(state, &config.inspect)
    });
    for (id, listener) in &config.listeners {
        let mut web = AxumListener::new(id.clone(), listener.clone(), writer.clone());
        if let Some(routes) = inspect.as_ref().filter(|_| *id == config.inspect.listener) {
            web = web.with_routes(routes.clone());
        }
        builder = builder.with_listener(Arc::new(web));
    }

    let manager = builder.build().await.context("failed to build gateway")?;
    manager.startup().await.context("failed to start gateway")?;
    info!(listeners = config.listeners.len(), protocols = ?[protocols::DUBBO, protocols::HTTP], "GATEWAY:READY");

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("GATEWAY:SHUTDOWN:REQUESTED");
    manager.shutdown().await;
    Ok(())
}

async fn load_config() -> anyhow::Result<GatewayConfig> {
    let path = std::env::args().nth(1).or_else(|| std::env::var("GATEWAY_CONFIG").ok());
    match path {
        Some(path) => GatewayConfig::load_from_file(&path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path)),
        None => {
            let mut config = GatewayConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}
