use crate::config::NodeAddress;
use crate::participant::state_model::PartitionState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-instance configuration record stored in the coordination service.
///
/// Keyed by the opaque `instance_name` (`<host>_<port>`). Written once when a
/// participant registers and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InstanceRecord {
    pub instance_name: String,
    pub host: String,
    pub port: u16,
}

impl InstanceRecord {
    pub fn new(instance_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            instance_name: instance_name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn for_node(node: &NodeAddress) -> Self {
        Self::new(node.instance_name(), &node.host, node.port)
    }
}

/// Identifier of a state model a participant can host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StateModelDefId(pub String);

impl StateModelDefId {
    pub const ONLINE_OFFLINE: &'static str = "OnlineOffline";

    pub fn online_offline() -> Self {
        Self(Self::ONLINE_OFFLINE.to_string())
    }
}

impl fmt::Display for StateModelDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PartitionId(pub String);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A state-transition command issued by the coordination service for one partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionMessage {
    pub state_model: StateModelDefId,
    pub partition: PartitionId,
    pub from: PartitionState,
    pub to: PartitionState,
}

impl TransitionMessage {
    pub fn online_offline(partition: &str, from: PartitionState, to: PartitionState) -> Self {
        Self {
            state_model: StateModelDefId::online_offline(),
            partition: PartitionId(partition.to_string()),
            from,
            to,
        }
    }
}
