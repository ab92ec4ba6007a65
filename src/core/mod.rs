//! # Core Module
//!
//! Fundamental building blocks shared by every other module: error types,
//! configuration, the routing metadata model, media-typed values and the
//! component lifecycle.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod types;
pub mod value;

pub use config::{Configuration, GatewayConfig, InspectConfig};
pub use error::{GatewayError, GatewayResult, ResolveError, ResolveResult, ServeError, ServeResult};
pub use lifecycle::{Lifecycle, LifecycleHooks};
pub use types::{Annotations, Argument, ArgumentKind, Attributes, Endpoint, NamedValue, Service};
pub use value::{MTValue, MediaType, Payload};
