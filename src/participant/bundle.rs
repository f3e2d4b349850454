use super::registrar::ParticipantRegistrar;
use crate::config::AppConfig;
use crate::coordination::CoordinationClient;
use crate::discovery::MembershipWatcher;
use crate::error::Result;
use crate::lifecycle::LifecycleEnvironment;

use std::sync::Arc;

/// Wires discovery into a host application's lifecycle from its configuration.
pub struct DiscoveryBundle {
    config: AppConfig,
}

impl DiscoveryBundle {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Resolves this node's address and manages a participant registrar for it.
    ///
    /// Fails with a configuration error if no reachable `(host, port)` can be
    /// derived from the server section.
    pub fn install(
        &self,
        client: Arc<dyn CoordinationClient>,
        env: &mut LifecycleEnvironment,
    ) -> Result<Arc<ParticipantRegistrar>> {
        let node = self.config.server.node_address()?;
        let registrar = Arc::new(ParticipantRegistrar::new(
            client,
            self.config.discovery.cluster_identity(),
            node,
        ));

        env.manage(registrar.clone());
        Ok(registrar)
    }

    /// Manages a membership watcher for the configured cluster.
    pub fn install_watcher(
        &self,
        client: Arc<dyn CoordinationClient>,
        env: &mut LifecycleEnvironment,
    ) -> Arc<MembershipWatcher> {
        let watcher = Arc::new(MembershipWatcher::from_config(
            client,
            &self.config.discovery,
        ));

        env.manage(watcher.clone());
        watcher
    }
}
