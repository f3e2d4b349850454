//! Membership Watcher (Spectator)
//!
//! Subscribes to live-instance notifications for a cluster and keeps an
//! [`EndpointSnapshot`] of where the live instances can be reached.
//!
//! ## Refresh Algorithm
//! Each notification carries the **full** live set (not a delta):
//! 1. Every live instance is resolved to its `(host, port)` with a bounded
//!    config read. Failures and timeouts skip that instance only.
//! 2. The assembled snapshot replaces the current one with a single atomic
//!    pointer swap.
//!
//! Readers (`snapshot`, `get_services`, `pick_random`) only load that pointer:
//! they never block and never touch the network.

use super::types::{Endpoint, EndpointSnapshot};
use crate::config::{ClusterIdentity, DiscoveryConfig};
use crate::coordination::{CoordinationClient, LiveInstanceListener};
use crate::error::{DiscoveryError, Result};
use crate::lifecycle::Managed;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Upper bound for a single instance-config read.
    pub resolve_timeout: Duration,
    /// Seed for endpoint selection. Random when `None`.
    pub seed: Option<u64>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            seed: None,
        }
    }
}

/// Builds snapshots on the coordination service's dispatch task and
/// publishes them.
struct SnapshotPublisher {
    client: Arc<dyn CoordinationClient>,
    cluster: String,
    resolve_timeout: Duration,
    current: ArcSwapOption<EndpointSnapshot>,
    generation: AtomicU64,
    /// Cleared by `stop`; notifications still queued on the dispatch task
    /// after that are dropped.
    accepting: AtomicBool,
}

impl SnapshotPublisher {
    async fn refresh(&self, live_instances: Vec<String>) -> Arc<EndpointSnapshot> {
        let snapshot = self.build(live_instances).await;
        self.current.store(Some(snapshot.clone()));
        snapshot
    }

    async fn build(&self, live_instances: Vec<String>) -> Arc<EndpointSnapshot> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut endpoints = Vec::with_capacity(live_instances.len());

        for instance in &live_instances {
            match self.resolve(instance).await {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(e) => tracing::warn!("Skipping live instance: {}", e),
            }
        }

        let snapshot = Arc::new(EndpointSnapshot::new(
            generation,
            live_instances.len(),
            endpoints,
        ));

        tracing::debug!(
            "Built snapshot {} for {}: {} of {} live instances resolved",
            generation,
            self.cluster,
            snapshot.len(),
            snapshot.live_instances
        );

        snapshot
    }

    async fn resolve(&self, instance: &str) -> Result<Endpoint> {
        let read = tokio::time::timeout(
            self.resolve_timeout,
            self.client.instance_config(&self.cluster, instance),
        )
        .await;

        let incomplete = || DiscoveryError::IncompleteRecord {
            instance: instance.to_string(),
        };

        let record = match read {
            Err(_) => {
                return Err(DiscoveryError::ResolutionTimeout {
                    instance: instance.to_string(),
                    timeout: self.resolve_timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(DiscoveryError::Resolution {
                    instance: instance.to_string(),
                    source,
                });
            }
            Ok(Ok(None)) => return Err(incomplete()),
            Ok(Ok(Some(record))) => record,
        };

        if record.host.trim().is_empty() || record.port == 0 {
            return Err(incomplete());
        }

        Ok(Endpoint::new(record.host, record.port))
    }
}

#[async_trait]
impl LiveInstanceListener for SnapshotPublisher {
    async fn on_live_instance_change(&self, live_instances: Vec<String>) {
        if !self.accepting.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring notification for {} after stop", self.cluster);
            return;
        }

        let snapshot = self.build(live_instances).await;

        // Stop may have run while instances were being resolved.
        if self.accepting.load(Ordering::SeqCst) {
            self.current.store(Some(snapshot));
        } else {
            tracing::debug!(
                "Discarding snapshot {} for {} after stop",
                snapshot.generation,
                self.cluster
            );
        }
    }
}

pub struct MembershipWatcher {
    client: Arc<dyn CoordinationClient>,
    cluster: ClusterIdentity,
    spectator_id: String,
    started: AtomicBool,
    publisher: Arc<SnapshotPublisher>,
    rng: Mutex<StdRng>,
}

impl MembershipWatcher {
    pub fn new(client: Arc<dyn CoordinationClient>, cluster: ClusterIdentity) -> Self {
        Self::with_options(client, cluster, WatcherOptions::default())
    }

    pub fn from_config(client: Arc<dyn CoordinationClient>, config: &DiscoveryConfig) -> Self {
        Self::with_options(
            client,
            config.cluster_identity(),
            WatcherOptions {
                resolve_timeout: config.resolve_timeout(),
                seed: None,
            },
        )
    }

    pub fn with_options(
        client: Arc<dyn CoordinationClient>,
        cluster: ClusterIdentity,
        options: WatcherOptions,
    ) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let publisher = Arc::new(SnapshotPublisher {
            client: client.clone(),
            cluster: cluster.name().to_string(),
            resolve_timeout: options.resolve_timeout,
            current: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            accepting: AtomicBool::new(false),
        });

        Self {
            client,
            cluster,
            spectator_id: format!("MembershipWatcher-{}", uuid::Uuid::new_v4()),
            started: AtomicBool::new(false),
            publisher,
            rng: Mutex::new(rng),
        }
    }

    pub fn cluster(&self) -> &ClusterIdentity {
        &self.cluster
    }

    pub fn spectator_id(&self) -> &str {
        &self.spectator_id
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Connects and subscribes to live-instance changes. No-op if already started.
    pub async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Watcher {} already started", self.spectator_id);
            return Ok(());
        }

        self.publisher.accepting.store(true, Ordering::SeqCst);

        if let Err(e) = self.subscribe().await {
            self.publisher.accepting.store(false, Ordering::SeqCst);
            self.started.store(false, Ordering::SeqCst);
            if let Err(disconnect_error) = self.client.disconnect().await {
                tracing::debug!("Disconnect after failed start: {}", disconnect_error);
            }
            return Err(e);
        }

        tracing::info!(
            "Watching live instances of {} as {}",
            self.cluster,
            self.spectator_id
        );

        Ok(())
    }

    async fn subscribe(&self) -> Result<()> {
        self.client
            .connect()
            .await
            .map_err(DiscoveryError::Connection)?;

        self.client
            .add_live_instance_listener(
                self.cluster.name(),
                &self.spectator_id,
                self.publisher.clone(),
            )
            .await?;

        Ok(())
    }

    /// Unsubscribes and disconnects. No-op if not started.
    ///
    /// The last published snapshot stays readable. Notifications already
    /// queued for delivery when `stop` runs are discarded rather than
    /// published. The disconnect is attempted even if unsubscribing fails;
    /// the first error encountered is returned.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.publisher.accepting.store(false, Ordering::SeqCst);

        let mut first_error: Option<DiscoveryError> = None;

        if let Err(e) = self
            .client
            .remove_live_instance_listener(self.cluster.name(), &self.spectator_id)
            .await
        {
            tracing::warn!("Failed to remove listener {}: {}", self.spectator_id, e);
            first_error = Some(e.into());
        }

        if let Err(e) = self.client.disconnect().await {
            tracing::warn!("Failed to disconnect from {}: {}", self.cluster, e);
            first_error.get_or_insert(DiscoveryError::Connection(e));
        }

        tracing::info!("Stopped watching {}", self.cluster);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The latest published snapshot, or `None` before the first notification.
    pub fn snapshot(&self) -> Option<Arc<EndpointSnapshot>> {
        self.publisher.current.load_full()
    }

    pub fn get_services(&self) -> Vec<Endpoint> {
        self.snapshot()
            .map(|snapshot| snapshot.endpoints.clone())
            .unwrap_or_default()
    }

    /// Picks one endpoint of the current snapshot uniformly at random.
    pub fn pick_random(&self) -> Result<Endpoint> {
        let snapshot = self
            .snapshot()
            .filter(|snapshot| !snapshot.is_empty())
            .ok_or(DiscoveryError::NoEndpointsAvailable)?;

        let idx = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..snapshot.len());

        Ok(snapshot.endpoints[idx].clone())
    }

    pub fn get_random_service(&self) -> Result<Endpoint> {
        self.pick_random()
    }

    /// Rebuilds and publishes the snapshot from a live-instance list.
    #[cfg(test)]
    pub(crate) async fn refresh(&self, live_instances: Vec<String>) -> Arc<EndpointSnapshot> {
        self.publisher.refresh(live_instances).await
    }

    #[cfg(test)]
    pub(crate) async fn resolve(&self, instance: &str) -> Result<Endpoint> {
        self.publisher.resolve(instance).await
    }

    /// The listener registered with the coordination service on `start`.
    #[cfg(test)]
    pub(crate) fn listener(&self) -> Arc<dyn LiveInstanceListener> {
        self.publisher.clone()
    }
}

#[async_trait]
impl Managed for MembershipWatcher {
    fn name(&self) -> &str {
        "membership-watcher"
    }

    async fn start(&self) -> anyhow::Result<()> {
        MembershipWatcher::start(self).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        MembershipWatcher::stop(self).await?;
        Ok(())
    }
}
