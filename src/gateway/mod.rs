//! # Gateway Module
//!
//! The request path and the composition root:
//!
//! - [`listener`]: HTTP listeners accepting route bindings at runtime
//! - [`dispatcher`]: per-request endpoint selection, filter chain and transport
//! - [`writer`]: response and error envelope rendering
//! - [`inspect`]: authenticated JSON views of routes and services
//! - [`manager`]: component registration, lifecycle and the discovery event loop

pub mod dispatcher;
pub mod inspect;
pub mod listener;
pub mod manager;
pub mod writer;

pub use dispatcher::{ContextHook, DispatchHooks, Dispatcher, EndpointHandler};
pub use inspect::{InspectRouter, InspectState};
pub use listener::{AxumListener, RouteHandler, WebListener};
pub use manager::{DispatcherManager, EventHandler, GatewayBuilder};
pub use writer::{JsonResponseWriter, ResponseWriter};
