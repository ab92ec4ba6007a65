//! Endpoint selection: pluggable selectors first, then the version locator.

use std::fmt;
use std::sync::Arc;

use crate::context::WebRequest;
use crate::core::types::Endpoint;
use crate::routing::table::MultiVersionEndpoint;

/// Header read by the default version locator
pub const DEFAULT_VERSION_HEADER: &str = "X-Version";

/// Picks an endpoint for a request before the static version lookup runs
///
/// Useful for canary or A/B routing without changing the table.
pub trait EndpointSelector: Send + Sync {
    /// Whether this selector applies to the request on this listener
    fn active(&self, request: &WebRequest, listener_id: &str) -> bool;

    /// The endpoint to use, or `None` to defer to the next selector
    fn select(&self, request: &WebRequest, listener_id: &str, entry: &MultiVersionEndpoint) -> Option<Endpoint>;
}

/// Extracts the requested endpoint version from a request
pub type VersionLocator = Arc<dyn Fn(&WebRequest) -> String + Send + Sync>;

/// Version locator reading a request header
pub fn header_version_locator<S: Into<String>>(header: S) -> VersionLocator {
    let header = header.into();
    Arc::new(move |request: &WebRequest| request.header(&header).unwrap_or_default().to_string())
}

/// Endpoint lookup strategy used by the dispatcher
#[derive(Clone)]
pub struct EndpointLocator {
    selectors: Vec<Arc<dyn EndpointSelector>>,
    version_locator: VersionLocator,
}

impl fmt::Debug for EndpointLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointLocator")
            .field("selectors", &self.selectors.len())
            .finish()
    }
}

impl Default for EndpointLocator {
    fn default() -> Self {
        Self::new(Vec::new(), header_version_locator(DEFAULT_VERSION_HEADER))
    }
}

impl EndpointLocator {
    pub fn new(selectors: Vec<Arc<dyn EndpointSelector>>, version_locator: VersionLocator) -> Self {
        Self {
            selectors,
            version_locator,
        }
    }

    pub fn lookup(&self, request: &WebRequest, listener_id: &str, entry: &MultiVersionEndpoint) -> Option<Endpoint> {
        for selector in &self.selectors {
            if !selector.active(request, listener_id) {
                continue;
            }
            if let Some(endpoint) = selector.select(request, listener_id, entry) {
                return Some(endpoint);
            }
        }
        entry.lookup(&(self.version_locator)(request))
    }
}
