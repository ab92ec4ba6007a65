//! # Component Lifecycle
//!
//! Discoveries, transporters, filters and listeners share one set of lifecycle
//! capabilities. Every hook has a no-op default, so a component only overrides
//! what it needs. Hooks are collected once at registration into a
//! [`LifecycleHooks`] list sorted by [`Lifecycle::order`]; nothing is re-checked
//! on later calls.
//!
//! Phases:
//! 1. `init(config)` once per component before serving, with its own config section
//! 2. `startup()` in ascending order
//! 3. `shutdown()` in descending order; failures are logged and the rest still run

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::config::Configuration;
use crate::core::error::GatewayResult;

/// Lifecycle capabilities of a gateway component
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Ordering key. Lower runs first at startup and, for filters, earlier in the chain.
    fn order(&self) -> i32 {
        0
    }

    async fn init(&self, _config: &Configuration) -> GatewayResult<()> {
        Ok(())
    }

    async fn startup(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> GatewayResult<()> {
        Ok(())
    }
}

/// Ordered list of registered lifecycle hooks
#[derive(Default, Clone)]
pub struct LifecycleHooks {
    hooks: Vec<(String, Arc<dyn Lifecycle>)>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook; the list stays sorted by order, ties keep registration order
    pub fn register<S: Into<String>>(&mut self, name: S, hook: Arc<dyn Lifecycle>) {
        self.hooks.push((name.into(), hook));
        self.hooks.sort_by_key(|(_, hook)| hook.order());
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Names in startup order
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Run every startup hook; the first failure aborts startup
    pub async fn startup(&self) -> GatewayResult<()> {
        for (name, hook) in &self.hooks {
            info!(component = %name, "LIFECYCLE:STARTUP");
            hook.startup().await?;
        }
        Ok(())
    }

    /// Run every shutdown hook in reverse order
    pub async fn shutdown(&self) {
        for (name, hook) in self.hooks.iter().rev() {
            info!(component = %name, "LIFECYCLE:SHUTDOWN");
            if let Err(e) = hook.shutdown().await {
                error!(component = %name, error = %e, "LIFECYCLE:SHUTDOWN/failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GatewayError;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        order: i32,
        log: Arc<Mutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    #[async_trait]
    impl Lifecycle for Recorder {
        fn order(&self) -> i32 {
            self.order
        }

        async fn startup(&self) -> GatewayResult<()> {
            self.log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn shutdown(&self) -> GatewayResult<()> {
            self.log.lock().push(format!("stop:{}", self.name));
            if self.fail_shutdown {
                return Err(GatewayError::internal("boom"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = LifecycleHooks::new();
        for (name, order, fail) in [("b", 2, true), ("a", 1, false), ("c", 3, false)] {
            hooks.register(
                name,
                Arc::new(Recorder {
                    name,
                    order,
                    log: log.clone(),
                    fail_shutdown: fail,
                }),
            );
        }
        assert_eq!(hooks.names(), vec!["a", "b", "c"]);

        hooks.startup().await.unwrap();
        hooks.shutdown().await;
        assert_eq!(
            *log.lock(),
            vec!["start:a", "start:b", "start:c", "stop:c", "stop:b", "stop:a"]
        );
    }
}
