//! # Configuration Module
//!
//! This module handles gateway configuration. It provides the top-level
//! [`GatewayConfig`] structure and the typed [`Configuration`] accessor handed to
//! every component (discoveries, transporters, filters) during initialization.
//!
//! ## Key Features
//! - YAML or TOML configuration parsing with serde, chosen by file extension
//! - Environment variable override support (`GATEWAY_*`)
//! - Validation with all problems reported at once
//! - Typed getters with explicit defaults instead of reflection-style lookups
//!
//! ## Example
//! ```yaml
//! listeners:
//!   default: { bind_address: "0.0.0.0", port: 8080 }
//! discovery:
//!   resource: { includes: ["conf.d/endpoints.yaml"] }
//! transporters:
//!   DUBBO: { reference_delay: "10ms", trace_enable: true }
//! filters:
//!   permission_filter: { disabled: false }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listeners indexed by listener id
    pub listeners: HashMap<String, ListenerConfig>,

    /// Dispatcher behavior
    pub dispatcher: DispatcherConfig,

    /// Discovery sections indexed by discovery id
    pub discovery: HashMap<String, Value>,

    /// Transporter sections indexed by protocol
    pub transporters: HashMap<String, Value>,

    /// Filter sections indexed by filter id
    pub filters: HashMap<String, Value>,

    /// Logging and metrics settings
    pub observability: ObservabilityConfig,

    /// Read-only endpoint and service inspection routes
    pub inspect: InspectConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut listeners = HashMap::new();
        listeners.insert("default".to_string(), ListenerConfig::default());
        Self {
            listeners,
            dispatcher: DispatcherConfig::default(),
            discovery: HashMap::new(),
            transporters: HashMap::new(),
            filters: HashMap::new(),
            observability: ObservabilityConfig::default(),
            inspect: InspectConfig::default(),
        }
    }
}

/// One HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to bind, e.g. `0.0.0.0`
    pub bind_address: String,
    /// Port to bind
    pub port: u16,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 4 * 1024 * 1024,
        }
    }
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid listener address: {}", e)))
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Request header carrying the endpoint version
    pub version_header: String,
    /// Include internal error causes in error responses
    pub debug_errors: bool,
    /// Value of the server identity header on every response
    pub writer_id: String,
    /// Number of request contexts kept for reuse
    pub context_pool_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            version_header: "X-Version".to_string(),
            debug_errors: false,
            writer_id: "rpc-gateway".to_string(),
            context_pool_size: 256,
        }
    }
}

/// Inspection routes mounted on one listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    pub enabled: bool,
    /// Listener serving the routes
    pub listener: String,
    /// Basic auth user name
    pub username: String,
    /// Basic auth password; generated at startup when empty
    pub password: String,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listener: "default".to_string(),
            username: "rpcgw".to_string(),
            password: String::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Output format of log lines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed
    pub enabled: bool,
    /// Address of the scrape endpoint
    pub bind_address: String,
    /// Histogram buckets in seconds
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:9090".to_string(),
            latency_buckets: vec![
                0.0005, 0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0,
            ],
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML or TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let mut config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(content).map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))
    }

    pub fn from_toml_str(content: &str) -> GatewayResult<Self> {
        toml::from_str(content).map_err(|e| GatewayError::config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>,
    /// for example `GATEWAY_LISTENER_PORT=8080` for the default listener.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(port) = env::var("GATEWAY_LISTENER_PORT") {
            let port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_LISTENER_PORT: {}", e)))?;
            self.listeners.entry("default".to_string()).or_default().port = port;
        }

        if let Ok(addr) = env::var("GATEWAY_LISTENER_BIND_ADDRESS") {
            self.listeners.entry("default".to_string()).or_default().bind_address = addr;
        }

        if let Ok(header) = env::var("GATEWAY_DISPATCHER_VERSION_HEADER") {
            self.dispatcher.version_header = header;
        }

        if let Ok(debug) = env::var("GATEWAY_DISPATCHER_DEBUG_ERRORS") {
            self.dispatcher.debug_errors = debug
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_DISPATCHER_DEBUG_ERRORS: {}", e)))?;
        }

        if let Ok(enabled) = env::var("GATEWAY_INSPECT_ENABLED") {
            self.inspect.enabled = enabled
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_INSPECT_ENABLED: {}", e)))?;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => return Err(GatewayError::config(format!("Invalid GATEWAY_LOG_FORMAT: {}", other))),
            };
        }

        if let Ok(enabled) = env::var("GATEWAY_METRICS_ENABLED") {
            self.observability.metrics.enabled = enabled
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_METRICS_ENABLED: {}", e)))?;
        }

        if let Ok(addr) = env::var("GATEWAY_METRICS_BIND_ADDRESS") {
            self.observability.metrics.bind_address = addr;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem found
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.listeners.is_empty() {
            errors.push("At least one listener must be configured".to_string());
        }

        for (id, listener) in &self.listeners {
            if listener.bind_address.is_empty() {
                errors.push(format!("Listener '{}' has empty bind_address", id));
            } else if listener.socket_addr().is_err() {
                errors.push(format!(
                    "Listener '{}' has invalid address {}:{}",
                    id, listener.bind_address, listener.port
                ));
            }
            if listener.max_body_size == 0 {
                errors.push(format!("Listener '{}' max_body_size must be greater than 0", id));
            }
        }

        if self.dispatcher.version_header.is_empty() {
            errors.push("dispatcher.version_header cannot be empty".to_string());
        }

        if self.inspect.enabled && !self.listeners.contains_key(&self.inspect.listener) {
            errors.push(format!("inspect.listener '{}' is not a configured listener", self.inspect.listener));
        }
        if self.inspect.enabled && self.inspect.username.is_empty() {
            errors.push("inspect.username cannot be empty".to_string());
        }

        match self.observability.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => errors.push(format!("Invalid log level: {}", other)),
        }

        if self.observability.metrics.enabled
            && self.observability.metrics.bind_address.parse::<SocketAddr>().is_err()
        {
            errors.push(format!(
                "Invalid metrics bind_address: {}",
                self.observability.metrics.bind_address
            ));
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Typed accessor over one discovery section
    pub fn discovery_config(&self, id: &str) -> Configuration {
        Configuration::from_section(format!("discovery.{}", id), self.discovery.get(id))
    }

    /// Typed accessor over one transporter section
    pub fn transporter_config(&self, protocol: &str) -> Configuration {
        let section = self
            .transporters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(protocol))
            .map(|(_, v)| v);
        Configuration::from_section(format!("transporters.{}", protocol), section)
    }

    /// Typed accessor over one filter section
    pub fn filter_config(&self, id: &str) -> Configuration {
        Configuration::from_section(format!("filters.{}", id), self.filters.get(id))
    }
}

/// Typed configuration accessor
///
/// Wraps one YAML mapping. Keys may be dotted (`registry.address`) to reach into
/// nested mappings. Defaults registered with [`Configuration::set_defaults`] are
/// consulted when a key is absent.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    namespace: String,
    values: Mapping,
    defaults: Mapping,
}

impl Configuration {
    /// Create an accessor; a non-mapping value yields an empty configuration
    pub fn new<S: Into<String>>(namespace: S, value: Value) -> Self {
        let values = match value {
            Value::Mapping(mapping) => mapping,
            _ => Mapping::new(),
        };
        Self {
            namespace: namespace.into(),
            values,
            defaults: Mapping::new(),
        }
    }

    pub fn empty<S: Into<String>>(namespace: S) -> Self {
        Self::new(namespace, Value::Null)
    }

    fn from_section(namespace: String, section: Option<&Value>) -> Self {
        Self::new(namespace, section.cloned().unwrap_or(Value::Null))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register default values for absent keys
    pub fn set_defaults<I, K>(&mut self, defaults: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in defaults {
            self.defaults.insert(Value::String(key.into()), value);
        }
    }

    fn lookup_in<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
        if let Some(value) = mapping.get(key) {
            return Some(value);
        }
        let mut parts = key.split('.');
        let mut current = mapping.get(parts.next()?)?;
        for part in parts {
            current = current.as_mapping()?.get(part)?;
        }
        Some(current)
    }

    /// Raw value of a key, falling back to the registered default
    pub fn get(&self, key: &str) -> Option<&Value> {
        Self::lookup_in(&self.values, key)
            .filter(|v| !v.is_null())
            .or_else(|| Self::lookup_in(&self.defaults, key))
    }

    /// Whether every given key has a value
    pub fn is_set(&self, keys: &[&str]) -> bool {
        keys.iter().all(|key| self.get(key).is_some())
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key).map(yaml_to_string).unwrap_or_default()
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        let value = self.get_string(key);
        if value.is_empty() {
            default.to_string()
        } else {
            value
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            Some(Value::Number(n)) => n.as_i64().map(|i| i != 0).unwrap_or(false),
            _ => false,
        }
    }

    pub fn get_int(&self, key: &str) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        }
    }

    /// Durations are humantime strings (`"10ms"`, `"5s"`) or plain milliseconds
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        match self.get(key)? {
            Value::String(s) => humantime::parse_duration(s.trim())
                .ok()
                .or_else(|| s.trim().parse::<u64>().ok().map(Duration::from_millis)),
            Value::Number(n) => n.as_u64().map(Duration::from_millis),
            _ => None,
        }
    }

    pub fn get_duration_or(&self, key: &str, default: Duration) -> Duration {
        self.get_duration(key).unwrap_or(default)
    }

    /// A sequence of texts or a comma-separated text
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Sequence(items)) => items.iter().map(yaml_to_string).collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Accessor over a nested mapping
    pub fn sub(&self, key: &str) -> Configuration {
        let value = Self::lookup_in(&self.values, key).cloned().unwrap_or(Value::Null);
        let mut sub = Configuration::new(format!("{}.{}", self.namespace, key), value);
        if let Some(Value::Mapping(defaults)) = Self::lookup_in(&self.defaults, key) {
            sub.defaults = defaults.clone();
        }
        sub
    }

    /// The `disabled` flag shared by every component section
    pub fn is_disabled(&self) -> bool {
        self.get_bool("disabled")
    }

    /// Deserialize the whole section (defaults merged) into a typed struct
    pub fn deserialize<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        let mut merged = self.defaults.clone();
        for (k, v) in &self.values {
            merged.insert(k.clone(), v.clone());
        }
        serde_yaml::from_value(Value::Mapping(merged)).map_err(|e| {
            GatewayError::config(format!("Invalid configuration section {}: {}", self.namespace, e))
        })
    }
}

fn yaml_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
listeners:
  default:
    bind_address: "127.0.0.1"
    port: 18080
dispatcher:
  debug_errors: true
transporters:
  dubbo:
    reference_delay: "20ms"
    trace_enable: true
    registry:
      id: zk
      address: "zookeeper://127.0.0.1:2181"
filters:
  permission_filter:
    disabled: true
discovery:
  resource:
    includes: ["a.yaml", "b.yaml"]
"#;

    #[test]
    fn test_parse_and_validate() {
        let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listeners["default"].port, 18080);
        assert!(config.dispatcher.debug_errors);
        assert_eq!(config.dispatcher.version_header, "X-Version");
    }

    #[test]
    fn test_typed_accessors() {
        let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        let dubbo = config.transporter_config("DUBBO");
        assert_eq!(dubbo.get_duration("reference_delay"), Some(Duration::from_millis(20)));
        assert!(dubbo.get_bool("trace_enable"));
        assert_eq!(dubbo.get_string("registry.address"), "zookeeper://127.0.0.1:2181");
        assert_eq!(dubbo.sub("registry").get_string("id"), "zk");
        assert!(dubbo.is_set(&["registry.id", "registry.address"]));
        assert!(!dubbo.is_set(&["registry.protocol"]));

        assert!(config.filter_config("permission_filter").is_disabled());
        assert!(!config.filter_config("missing").is_disabled());
        assert_eq!(
            config.discovery_config("resource").get_string_list("includes"),
            vec!["a.yaml", "b.yaml"]
        );
    }

    #[test]
    fn test_defaults() {
        let mut config = Configuration::empty("test");
        config.set_defaults([
            ("timeout", Value::String("5s".into())),
            ("retries", Value::Number(2.into())),
        ]);
        assert_eq!(config.get_duration("timeout"), Some(Duration::from_secs(5)));
        assert_eq!(config.get_int("retries"), 2);
        assert_eq!(config.get_string_or("cluster", "failover"), "failover");
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = GatewayConfig::default();
        config.dispatcher.version_header.clear();
        config.observability.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("version_header"));
        assert!(err.contains("Invalid log level"));
    }

    #[test]
    fn test_inspect_listener_must_exist() {
        let mut config = GatewayConfig::default();
        assert!(!config.inspect.enabled);
        config.inspect.enabled = true;
        assert!(config.validate().is_ok());

        config.inspect.listener = "admin".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("inspect.listener 'admin'"));
    }

    #[test]
    fn test_toml_config() {
        let config = GatewayConfig::from_toml_str(
            r#"
[listeners.default]
bind_address = "127.0.0.1"
port = 9000

[transporters.HTTP]
trace_enable = true
"#,
        )
        .unwrap();
        assert_eq!(config.listeners["default"].port, 9000);
        assert!(config.transporter_config("http").get_bool("trace_enable"));
    }
}
