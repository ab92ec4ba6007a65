//! Backend service registry, indexed by service id and alias id.

use dashmap::DashMap;

use crate::core::types::Service;

/// Concurrent registry of backend services
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a service under its id and, when set, its alias id
    pub fn register(&self, service: Service) {
        let id = service.service_id();
        if !service.alias_id.is_empty() && service.alias_id != id {
            self.services.insert(service.alias_id.clone(), service.clone());
        }
        if !id.is_empty() {
            self.services.insert(id, service);
        }
    }

    /// Remove a service by id and alias id
    pub fn remove(&self, service: &Service) {
        self.services.remove(&service.service_id());
        if !service.alias_id.is_empty() {
            self.services.remove(&service.alias_id);
        }
    }

    pub fn by_id(&self, id: &str) -> Option<Service> {
        self.services.get(id).map(|s| s.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Number of registered ids, aliases included
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
