use serde::{Deserialize, Serialize};
use std::fmt;

/// A reachable service location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable view of the resolved endpoints for one live-instance notification.
///
/// A new snapshot replaces the previous one as a whole; it is never edited.
/// `live_instances` is the size of the notification it was built from, so
/// `live_instances - len()` is the number of instances that failed to resolve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub generation: u64,
    pub live_instances: usize,
    pub endpoints: Vec<Endpoint>,
}

impl EndpointSnapshot {
    pub fn new(generation: u64, live_instances: usize, endpoints: Vec<Endpoint>) -> Self {
        Self {
            generation,
            live_instances,
            endpoints,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn unresolved(&self) -> usize {
        self.live_instances.saturating_sub(self.endpoints.len())
    }
}
