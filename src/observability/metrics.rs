//! # Dispatch Metrics
//!
//! Metrics go through the `metrics` facade; [`install_prometheus`] installs the
//! Prometheus recorder with its own scrape endpoint. Without an installed
//! recorder every call here is a no-op.
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `gateway_endpoint_access_total` | counter | proto, interface, method |
//! | `gateway_endpoint_error_total` | counter | proto, interface, method, error_code |
//! | `gateway_endpoint_duration_seconds` | histogram | component, type_id |

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::core::config::MetricsConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Service;

pub const ACCESS_TOTAL: &str = "gateway_endpoint_access_total";
pub const ERROR_TOTAL: &str = "gateway_endpoint_error_total";
pub const DURATION_SECONDS: &str = "gateway_endpoint_duration_seconds";

/// Install the Prometheus recorder and its HTTP scrape listener
pub fn install_prometheus(config: &MetricsConfig) -> GatewayResult<()> {
    if !config.enabled {
        info!("METRICS:DISABLED");
        return Ok(());
    }
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|e| GatewayError::config(format!("Invalid metrics bind address '{}': {}", config.bind_address, e)))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(DURATION_SECONDS.to_string()), &config.latency_buckets)
        .map_err(|e| GatewayError::config(format!("Failed to set histogram buckets: {}", e)))?
        .install()
        .map_err(|e| GatewayError::internal(format!("Failed to install metrics exporter: {}", e)))?;
    info!(address = %addr, "METRICS:PROMETHEUS:LISTENING");
    Ok(())
}

/// Count one request to a backend service
pub fn record_access(service: &Service) {
    ::metrics::counter!(
        ACCESS_TOTAL,
        "proto" => service.protocol.clone(),
        "interface" => service.interface.clone(),
        "method" => service.method.clone()
    )
    .increment(1);
}

/// Count one failed request to a backend service
pub fn record_error(service: &Service, error_code: &str) {
    ::metrics::counter!(
        ERROR_TOTAL,
        "proto" => service.protocol.clone(),
        "interface" => service.interface.clone(),
        "method" => service.method.clone(),
        "error_code" => error_code.to_string()
    )
    .increment(1);
}

/// Record the duration of one dispatch phase
pub fn record_duration(component: &'static str, type_id: &str, latency: Duration) {
    ::metrics::histogram!(
        DURATION_SECONDS,
        "component" => component,
        "type_id" => type_id.to_string()
    )
    .record(latency.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_exporter_is_skipped() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(install_prometheus(&config).is_ok());
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = MetricsConfig {
            bind_address: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(install_prometheus(&config).is_err());
    }

    #[test]
    fn test_recording_without_recorder() {
        let service = Service::new("DUBBO", "demo.UserService", "get");
        record_access(&service);
        record_error(&service, "GATEWAY:BACKEND");
        record_duration("dispatcher", "filters", Duration::from_millis(2));
    }
}
