//! Error Types
//!
//! Two layers of errors:
//! - [`CoordinationError`] is what a coordination client reports about the
//!   external service (unreachable, missing records, rejected commands).
//! - [`DiscoveryError`] is what the discovery and participant components
//!   surface to their callers.

use crate::participant::state_model::PartitionState;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`CoordinationClient`](crate::coordination::CoordinationClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("coordination service unreachable at {0}")]
    Unreachable(String),

    #[error("not connected to the coordination service")]
    NotConnected,

    #[error("cluster {0} does not exist")]
    ClusterNotFound(String),

    #[error("instance {0} already exists")]
    InstanceExists(String),

    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error("malformed record at {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("participant {0} is not started")]
    ParticipantNotStarted(String),

    /// The command's source state does not match the partition's current state.
    #[error("stale transition for {partition}: expected {expected}, partition is {actual}")]
    StaleTransition {
        partition: String,
        expected: PartitionState,
        actual: PartitionState,
    },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: PartitionState,
        to: PartitionState,
    },

    #[error("no state model factory registered for {0}")]
    NoStateModel(String),
}

/// Errors surfaced by the membership watcher and the participant registrar.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The coordination service could not be reached. Fatal to `start`/`run`.
    #[error("connection error: {0}")]
    Connection(#[source] CoordinationError),

    /// This node's reachable address could not be determined.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single live instance could not be resolved to an endpoint.
    /// The resolution variants are only ever logged during a membership refresh.
    #[error("failed to resolve instance {instance}: {source}")]
    Resolution {
        instance: String,
        #[source]
        source: CoordinationError,
    },

    #[error("config read for instance {instance} timed out after {timeout:?}")]
    ResolutionTimeout { instance: String, timeout: Duration },

    /// Missing record, empty host or port 0.
    #[error("instance {instance} has no usable address record")]
    IncompleteRecord { instance: String },

    #[error("no endpoints available")]
    NoEndpointsAvailable,

    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),
}

pub type Result<T, E = DiscoveryError> = std::result::Result<T, E>;
