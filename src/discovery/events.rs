//! Discovery event types.

use std::fmt;
use std::str::FromStr;

use crate::core::error::GatewayError;
use crate::core::types::{Endpoint, Service};

/// Kind of change carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Updated,
    Removed,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Added => "ADDED",
            EventType::Updated => "UPDATED",
            EventType::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// Change kinds reported by an external watch mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    NodeAdded,
    NodeUpdated,
    NodeDeleted,
}

impl NodeEvent {
    pub fn event_type(self) -> EventType {
        match self {
            NodeEvent::NodeAdded => EventType::Added,
            NodeEvent::NodeUpdated => EventType::Updated,
            NodeEvent::NodeDeleted => EventType::Removed,
        }
    }
}

impl FromStr for NodeEvent {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" | "added" | "create" | "created" => Ok(NodeEvent::NodeAdded),
            "update" | "updated" | "change" | "changed" => Ok(NodeEvent::NodeUpdated),
            "delete" | "deleted" | "remove" | "removed" => Ok(NodeEvent::NodeDeleted),
            other => Err(GatewayError::decode(format!("DECODE:EVENT:UNKNOWN/{}", other))),
        }
    }
}

/// A change to one endpoint version
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointEvent {
    pub event_type: EventType,
    pub endpoint: Endpoint,
}

impl EndpointEvent {
    pub fn new(event_type: EventType, endpoint: Endpoint) -> Self {
        Self { event_type, endpoint }
    }
}

/// A change to one backend service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEvent {
    pub event_type: EventType,
    pub service: Service,
}

impl ServiceEvent {
    pub fn new(event_type: EventType, service: Service) -> Self {
        Self { event_type, service }
    }
}
