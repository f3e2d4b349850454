//! Participant Registration
//!
//! Joins this node to the cluster as a participant named `<host>_<port>`:
//! 1. **Connect** to the coordination service.
//! 2. **Register** an instance record for the node, unless one already exists.
//! 3. **Host** the ONLINE/OFFLINE state model and start accepting transitions.
//!
//! Shutdown stops the participant (if one was started) and always attempts
//! to release the connection afterwards.

use crate::config::{ClusterIdentity, NodeAddress};
use crate::coordination::{
    CoordinationClient, InstanceRecord, Participant, StateModelDefId, StateModelFactory,
};
use crate::error::{CoordinationError, DiscoveryError, Result};
use crate::lifecycle::Managed;

use super::state_model::OnlineOfflineStateModelFactory;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ParticipantRegistrar {
    client: Arc<dyn CoordinationClient>,
    cluster: ClusterIdentity,
    node: NodeAddress,
    factory: Arc<dyn StateModelFactory>,
    participant: RwLock<Option<Arc<dyn Participant>>>,
}

impl ParticipantRegistrar {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        cluster: ClusterIdentity,
        node: NodeAddress,
    ) -> Self {
        Self::with_factory(
            client,
            cluster,
            node,
            Arc::new(OnlineOfflineStateModelFactory::new()),
        )
    }

    /// Uses a custom handler factory for the ONLINE/OFFLINE model, e.g. one
    /// carrying readiness or drain hooks.
    pub fn with_factory(
        client: Arc<dyn CoordinationClient>,
        cluster: ClusterIdentity,
        node: NodeAddress,
        factory: Arc<dyn StateModelFactory>,
    ) -> Self {
        Self {
            client,
            cluster,
            node,
            factory,
            participant: RwLock::new(None),
        }
    }

    pub fn instance_name(&self) -> String {
        self.node.instance_name()
    }

    pub fn node(&self) -> &NodeAddress {
        &self.node
    }

    pub async fn is_running(&self) -> bool {
        self.participant.read().await.is_some()
    }

    /// Connects, registers this node and starts the participant.
    pub async fn run(&self) -> Result<()> {
        let instance_name = self.instance_name();

        self.client
            .connect()
            .await
            .map_err(DiscoveryError::Connection)?;

        if let Err(e) = self.join(&instance_name).await {
            // Release the session so a half-joined participant does not linger.
            if let Err(disconnect_error) = self.client.disconnect().await {
                tracing::debug!("Disconnect after failed run: {}", disconnect_error);
            }
            return Err(e);
        }

        tracing::info!(
            "Connected to {}/{} as {}",
            self.cluster.coordination_address(),
            self.cluster.name(),
            instance_name
        );

        Ok(())
    }

    async fn join(&self, instance_name: &str) -> Result<()> {
        let participant = self
            .client
            .create_participant(self.cluster.name(), instance_name)
            .await?;

        self.ensure_registered().await?;

        participant.register_state_model_factory(
            StateModelDefId::online_offline(),
            self.factory.clone(),
        );

        participant.start().await?;
        *self.participant.write().await = Some(participant);

        Ok(())
    }

    /// Creates this node's instance record if the cluster does not list it yet.
    ///
    /// Returns `true` if a record was created. A concurrent create of the
    /// same name counts as already registered.
    pub async fn ensure_registered(&self) -> Result<bool> {
        let instance_name = self.instance_name();
        let cluster = self.cluster.name();

        let instances = self.client.instances_in_cluster(cluster).await?;
        if instances.contains(&instance_name) {
            tracing::debug!("Instance {} already in cluster {}", instance_name, cluster);
            return Ok(false);
        }

        match self
            .client
            .add_instance(cluster, InstanceRecord::for_node(&self.node))
            .await
        {
            Ok(()) => {
                tracing::info!("Added instance {} to cluster {}", instance_name, cluster);
                Ok(true)
            }
            Err(CoordinationError::InstanceExists(_)) => {
                tracing::debug!("Instance {} was registered concurrently", instance_name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stops the participant, then disconnects.
    ///
    /// The disconnect is attempted even if stopping fails; the first error
    /// encountered is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error: Option<DiscoveryError> = None;

        let participant = self.participant.write().await.take();
        if let Some(participant) = participant
            && let Err(e) = participant.stop().await
        {
            tracing::warn!("Failed to stop participant {}: {}", participant.id(), e);
            first_error = Some(e.into());
        }

        if let Err(e) = self.client.disconnect().await {
            tracing::warn!("Failed to disconnect from {}: {}", self.cluster, e);
            first_error.get_or_insert(DiscoveryError::Connection(e));
        }

        tracing::info!(
            "Disconnected from {}/{}",
            self.cluster.coordination_address(),
            self.cluster.name()
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Managed for ParticipantRegistrar {
    fn name(&self) -> &str {
        "participant-registrar"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.run().await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown().await?;
        Ok(())
    }
}
