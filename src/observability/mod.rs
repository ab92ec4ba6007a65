//! # Observability
//!
//! - [`logging`]: global `tracing` subscriber setup
//! - [`metrics`]: Prometheus exporter and the dispatch counters and histogram

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::install_prometheus;
