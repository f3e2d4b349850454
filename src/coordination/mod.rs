//! Coordination Service Boundary
//!
//! The coordination service (liveness, cluster state persistence, transition
//! scheduling) is an external collaborator. This module describes the calls
//! the discovery core makes into it as traits, plus an embedded in-memory
//! implementation ([`memory::InMemoryCoordinator`]) for standalone nodes and tests.
//!
//! ## Delivery Model
//! - Live-instance listeners receive the **full** live set on every change,
//!   starting with the set current at registration time.
//! - Notifications and transition commands run on tasks owned by the
//!   coordination service, never on tasks owned by the caller.

pub mod memory;
pub mod types;


use crate::error::CoordinationError;
use crate::participant::state_model::PartitionState;
use async_trait::async_trait;
use std::sync::Arc;

pub use types::{InstanceRecord, PartitionId, StateModelDefId, TransitionMessage};

/// Receives the live-instance set of a cluster whenever it changes.
#[async_trait]
pub trait LiveInstanceListener: Send + Sync {
    async fn on_live_instance_change(&self, live_instances: Vec<String>);
}

/// Per-partition state machine driven by transition commands.
pub trait TransitionHandler: Send + Sync {
    fn state(&self) -> PartitionState;

    fn handle(&mut self, message: &TransitionMessage) -> Result<(), CoordinationError>;
}

/// Creates one [`TransitionHandler`] per partition assigned to a participant.
pub trait StateModelFactory: Send + Sync {
    fn create_handler(&self, partition: &PartitionId) -> Box<dyn TransitionHandler>;
}

/// A named, addressable member of a cluster that accepts transition commands.
#[async_trait]
pub trait Participant: Send + Sync {
    fn id(&self) -> &str;

    fn register_state_model_factory(
        &self,
        model: StateModelDefId,
        factory: Arc<dyn StateModelFactory>,
    );

    /// Joins the live-instance set and begins accepting transition commands.
    async fn start(&self) -> Result<(), CoordinationError>;

    async fn stop(&self) -> Result<(), CoordinationError>;
}

/// Connection to a coordination service.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    fn address(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), CoordinationError>;

    /// Releases the connection. Local state is released even when the
    /// service cannot be reached; the error is still reported.
    async fn disconnect(&self) -> Result<(), CoordinationError>;

    async fn add_live_instance_listener(
        &self,
        cluster: &str,
        role_id: &str,
        listener: Arc<dyn LiveInstanceListener>,
    ) -> Result<(), CoordinationError>;

    async fn remove_live_instance_listener(
        &self,
        cluster: &str,
        role_id: &str,
    ) -> Result<(), CoordinationError>;

    /// Reads an instance's configuration record. `Ok(None)` when absent.
    async fn instance_config(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<Option<InstanceRecord>, CoordinationError>;

    async fn instances_in_cluster(&self, cluster: &str) -> Result<Vec<String>, CoordinationError>;

    /// Creates an instance record. Fails with
    /// [`CoordinationError::InstanceExists`] when the name is taken.
    async fn add_instance(
        &self,
        cluster: &str,
        record: InstanceRecord,
    ) -> Result<(), CoordinationError>;

    async fn create_participant(
        &self,
        cluster: &str,
        participant_id: &str,
    ) -> Result<Arc<dyn Participant>, CoordinationError>;
}
