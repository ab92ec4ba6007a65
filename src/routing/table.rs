//! # Multi-Version Routing Table
//!
//! The table maps a route key (`METHOD#PATTERN`) to a [`MultiVersionEndpoint`]
//! holding every registered version of that route.
//!
//! ## Concurrency
//! - The outer table is a `DashMap`, sharded, so lookups for different route keys
//!   do not contend.
//! - Each entry guards its version map with a `parking_lot::RwLock`: request
//!   lookups take the read lock, discovery updates take the write lock.
//! - Lookups return owned clones. Callers may modify their copy freely.
//!
//! Entries are never removed once created, even when their last version is
//! deleted: the route key stays bound to its HTTP handler.

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::types::Endpoint;

/// Build the route key of a method and pattern
pub fn make_route_key(method: &str, pattern: &str) -> String {
    format!("{}#{}", method.to_ascii_uppercase(), pattern)
}

/// Every version of one route
#[derive(Debug, Default)]
pub struct MultiVersionEndpoint {
    versions: RwLock<HashMap<String, Endpoint>>,
}

impl MultiVersionEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry holding one endpoint under its version
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        let entry = Self::new();
        entry.update(&endpoint.version.clone(), endpoint);
        entry
    }

    /// Find the endpoint for `version`
    ///
    /// An empty version, or an entry with exactly one version, returns that
    /// single entry (a random one when an empty version meets several).
    /// Otherwise only an exact match is returned.
    pub fn lookup(&self, version: &str) -> Option<Endpoint> {
        let versions = self.versions.read();
        if version.is_empty() || versions.len() == 1 {
            return versions.values().choose(&mut rand::thread_rng()).cloned();
        }
        versions.get(version).cloned()
    }

    /// Insert or replace one version
    pub fn update(&self, version: &str, endpoint: Endpoint) {
        self.versions.write().insert(version.to_string(), endpoint);
    }

    /// Remove one version, returning it
    pub fn delete(&self, version: &str) -> Option<Endpoint> {
        self.versions.write().remove(version)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    /// Any one registered version
    pub fn random(&self) -> Option<Endpoint> {
        self.versions.read().values().choose(&mut rand::thread_rng()).cloned()
    }

    /// Snapshot of every version
    pub fn endpoints(&self) -> HashMap<String, Endpoint> {
        self.versions.read().clone()
    }
}

/// Route key to versioned endpoints
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: DashMap<String, Arc<MultiVersionEndpoint>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry of a route key, creating it from `endpoint` when absent
    ///
    /// Returns `true` as the second element only when this call created the entry.
    /// An existing entry is returned unchanged.
    pub fn register_or_get(&self, route_key: &str, endpoint: &Endpoint) -> (Arc<MultiVersionEndpoint>, bool) {
        if let Some(entry) = self.entries.get(route_key) {
            return (Arc::clone(entry.value()), false);
        }
        let mut created = false;
        let entry = self
            .entries
            .entry(route_key.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(MultiVersionEndpoint::with_endpoint(endpoint.clone()))
            })
            .clone();
        (entry, created)
    }

    pub fn get(&self, route_key: &str) -> Option<Arc<MultiVersionEndpoint>> {
        self.entries.get(route_key).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, route_key: &str) -> bool {
        self.entries.contains_key(route_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn route_keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> Vec<(String, Arc<MultiVersionEndpoint>)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(version: &str) -> Endpoint {
        Endpoint {
            version: version.to_string(),
            http_method: "GET".to_string(),
            http_pattern: "/a".to_string(),
            service_id: "demo.Service:get".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_route_key() {
        assert_eq!(make_route_key("get", "/users/:id"), "GET#/users/:id");
    }

    #[test]
    fn test_delete_keeps_entry() {
        let table = RoutingTable::new();
        let (entry, created) = table.register_or_get("GET#/a", &endpoint("1.0"));
        assert!(created);
        assert_eq!(entry.delete("1.0").map(|e| e.version), Some("1.0".to_string()));
        assert!(entry.is_empty());
        assert!(table.contains("GET#/a"));
        assert!(entry.lookup("").is_none());
    }

    #[test]
    fn test_lookup_returns_copies() {
        let entry = MultiVersionEndpoint::with_endpoint(endpoint("1.0"));
        let mut copy = entry.lookup("1.0").unwrap();
        copy.application = "changed".to_string();
        assert_eq!(entry.lookup("1.0").unwrap().application, "");
    }

    #[test]
    fn test_register_or_get_returns_existing() {
        let table = RoutingTable::new();
        let (first, _) = table.register_or_get("GET#/a", &endpoint("1.0"));
        let (second, created) = table.register_or_get("GET#/a", &endpoint("2.0"));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
    }
}
