//! # Filter Chain
//!
//! Filters wrap the terminal transport step of a request. Each filter receives
//! the request context and a [`Next`] continuation; it decides whether, and
//! when, the rest of the chain runs. Returning an error short-circuits the chain.
//!
//! The chain of a request is the global filters sorted by [`Lifecycle::order`]
//! (lowest first), followed by the filters of every [`FilterSelector`] active
//! for that request. Filters whose configuration is disabled never make it into
//! the registry.
//!
//! ## Rust Concepts Used
//! - A borrowed slice walked with `split_first` instead of nested closures
//! - `#[async_trait]` with a lifetime-carrying argument (`Next<'_>`)

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::Context;
use crate::core::error::ServeResult;
use crate::core::lifecycle::Lifecycle;

/// A request filter
#[async_trait]
pub trait Filter: Lifecycle + fmt::Debug {
    /// Unique filter id, also the key of its configuration section
    fn filter_id(&self) -> &str;

    /// Process the request; call `next.run(ctx)` to continue the chain
    async fn do_filter(&self, ctx: &mut Context, next: Next<'_>) -> ServeResult<()>;
}

/// Picks extra filters for the requests it activates on
pub trait FilterSelector: Send + Sync + fmt::Debug {
    fn activate(&self, ctx: &Context) -> bool;

    fn select(&self, ctx: &Context) -> Vec<Arc<dyn Filter>>;
}

/// Last step of the chain
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn handle(&self, ctx: &mut Context) -> ServeResult<()>;
}

/// The remainder of a filter chain
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub fn new(filters: &'a [Arc<dyn Filter>], terminal: &'a dyn Terminal) -> Self {
        Self { filters, terminal }
    }

    /// Number of filters left before the terminal
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }

    /// Run the next filter, or the terminal when none is left
    pub async fn run(self, ctx: &mut Context) -> ServeResult<()> {
        match self.filters.split_first() {
            Some((first, rest)) => first.do_filter(ctx, Next::new(rest, self.terminal)).await,
            None => self.terminal.handle(ctx).await,
        }
    }
}

/// Registered filters and selectors
#[derive(Debug, Default)]
pub struct FilterRegistry {
    globals: Vec<Arc<dyn Filter>>,
    selectors: Vec<Arc<dyn FilterSelector>>,
    disabled: HashSet<String>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a filter id as disabled; it is refused by [`FilterRegistry::add_global`]
    /// and dropped from selector results
    pub fn disable<S: Into<String>>(&mut self, filter_id: S) {
        self.disabled.insert(filter_id.into());
    }

    pub fn is_disabled(&self, filter_id: &str) -> bool {
        self.disabled.contains(filter_id)
    }

    /// Register a global filter, keeping the list sorted by order.
    /// Returns false when the filter is disabled.
    pub fn add_global(&mut self, filter: Arc<dyn Filter>) -> bool {
        if self.is_disabled(filter.filter_id()) {
            info!(filter = %filter.filter_id(), "FILTER:REGISTER/disabled");
            return false;
        }
        debug!(filter = %filter.filter_id(), order = filter.order(), "FILTER:REGISTER");
        self.globals.push(filter);
        self.globals.sort_by_key(|f| f.order());
        true
    }

    pub fn add_selector(&mut self, selector: Arc<dyn FilterSelector>) {
        self.selectors.push(selector);
    }

    pub fn globals(&self) -> &[Arc<dyn Filter>] {
        &self.globals
    }

    /// Filters to run for one request, in execution order
    pub fn build_chain(&self, ctx: &Context) -> Vec<Arc<dyn Filter>> {
        let mut chain = self.globals.clone();
        for selector in &self.selectors {
            if !selector.activate(ctx) {
                continue;
            }
            chain.extend(
                selector
                    .select(ctx)
                    .into_iter()
                    .filter(|f| !self.is_disabled(f.filter_id())),
            );
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ServeError;
    use serde_json::{json, Value};

    #[derive(Debug)]
    struct Recording {
        id: String,
        order: i32,
        reject: bool,
    }

    impl Recording {
        fn new(order: i32) -> Arc<dyn Filter> {
            Arc::new(Self {
                id: format!("f{}", order),
                order,
                reject: false,
            })
        }
    }

    impl Lifecycle for Recording {
        fn order(&self) -> i32 {
            self.order
        }
    }

    #[async_trait]
    impl Filter for Recording {
        fn filter_id(&self) -> &str {
            &self.id
        }

        async fn do_filter(&self, ctx: &mut Context, next: Next<'_>) -> ServeResult<()> {
            let mut seen = ctx.attribute("seen").unwrap_or_else(|| json!([]));
            if let Value::Array(items) = &mut seen {
                items.push(json!(self.order));
            }
            ctx.set_attribute("seen", seen);
            if self.reject {
                return Err(ServeError::access_denied("denied"));
            }
            next.run(ctx).await
        }
    }

    struct Done;

    #[async_trait]
    impl Terminal for Done {
        async fn handle(&self, ctx: &mut Context) -> ServeResult<()> {
            ctx.set_attribute("done", json!(true));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_filters_run_in_order() {
        let mut registry = FilterRegistry::new();
        for order in [3, 1, 2] {
            registry.add_global(Recording::new(order));
        }
        let mut ctx = Context::default();
        let chain = registry.build_chain(&ctx);
        Next::new(&chain, &Done).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.attribute("seen"), Some(json!([1, 2, 3])));
        assert_eq!(ctx.attribute("done"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_rejecting_filter_short_circuits() {
        let mut registry = FilterRegistry::new();
        registry.add_global(Recording::new(1));
        registry.add_global(Arc::new(Recording {
            id: "deny".into(),
            order: 2,
            reject: true,
        }));
        registry.add_global(Recording::new(3));
        let mut ctx = Context::default();
        let chain = registry.build_chain(&ctx);
        let err = Next::new(&chain, &Done).run(&mut ctx).await.unwrap_err();

        assert_eq!(err.message, "denied");
        assert_eq!(ctx.attribute("seen"), Some(json!([1, 2])));
        assert_eq!(ctx.attribute("done"), None);
    }

    #[derive(Debug)]
    struct OnPost;

    impl FilterSelector for OnPost {
        fn activate(&self, ctx: &Context) -> bool {
            ctx.request().method() == axum::http::Method::POST
        }

        fn select(&self, _ctx: &Context) -> Vec<Arc<dyn Filter>> {
            vec![Recording::new(9), Recording::new(0)]
        }
    }

    #[test]
    fn test_selectors_and_disabled_filters() {
        let mut registry = FilterRegistry::new();
        registry.disable("f5");
        registry.disable("f0");
        assert!(!registry.add_global(Recording::new(5)));
        assert!(registry.add_global(Recording::new(1)));
        registry.add_selector(Arc::new(OnPost));

        let get = Context::default();
        assert_eq!(registry.build_chain(&get).len(), 1);

        let post = Context::new(
            crate::context::WebRequest::new(
                axum::http::Method::POST,
                axum::http::Uri::from_static("/"),
                Default::default(),
                Default::default(),
            ),
            Default::default(),
        );
        let ids: Vec<String> = registry
            .build_chain(&post)
            .iter()
            .map(|f| f.filter_id().to_string())
            .collect();
        assert_eq!(ids, vec!["f1", "f9"]);
    }
}
