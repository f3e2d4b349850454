//! Embedded Coordination Service
//!
//! An in-process stand-in for the external coordination service. It keeps
//! the same observable contract the discovery core relies on:
//! - Connections are session based; disconnecting (or losing) a session
//!   removes its live instances and listeners.
//! - Instance records are stored as encoded bytes, like znodes, and decoded
//!   on every read.
//! - Live-instance listeners get the full live set, in order, on a dispatch
//!   task per listener.
//! - Transition commands are validated against the partition's current
//!   state before the participant's handler is invoked.
//!
//! Fault injection hooks (`set_reachable`, `fail_config_reads`,
//! `delay_config_reads`, `corrupt_instance_config`) exist for exercising
//! degraded paths.

use super::{
    CoordinationClient, InstanceRecord, LiveInstanceListener, Participant, PartitionId,
    StateModelDefId, StateModelFactory, TransitionHandler, TransitionMessage,
};
use crate::error::CoordinationError;
use crate::participant::state_model::PartitionState;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

type SessionId = Uuid;

/// Owner recorded for live entries forced in without a session.
const NO_SESSION: SessionId = Uuid::nil();

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn config_key(cluster: &str, instance: &str) -> String {
    format!("/{}/CONFIGS/PARTICIPANT/{}", cluster, instance)
}

struct ListenerSlot {
    session: SessionId,
    sender: mpsc::UnboundedSender<Vec<String>>,
}

#[derive(Default)]
struct ClusterState {
    records: DashMap<String, Vec<u8>>,
    live: DashMap<String, SessionId>,
    listeners: DashMap<String, ListenerSlot>,
    participants: DashMap<String, Arc<InMemoryParticipant>>,
    // Serializes live-set changes with their notifications.
    membership_lock: Mutex<()>,
}

impl ClusterState {
    fn live_instances(&self) -> Vec<String> {
        let mut live: Vec<String> = self.live.iter().map(|entry| entry.key().clone()).collect();
        live.sort();
        live
    }

    /// Applies `change` to the live set and, if it reports a change, sends
    /// the new full set to every listener.
    fn update_live<F>(&self, change: F)
    where
        F: FnOnce(&DashMap<String, SessionId>) -> bool,
    {
        let _guard = lock(&self.membership_lock);

        if !change(&self.live) {
            return;
        }

        let live = self.live_instances();
        tracing::debug!("Live instances changed: {:?}", live);

        self.listeners.retain(|role, slot| {
            if slot.sender.send(live.clone()).is_err() {
                tracing::debug!("Dropping closed listener {}", role);
                false
            } else {
                true
            }
        });
    }

    fn add_listener(
        &self,
        role_id: &str,
        session: SessionId,
        listener: Arc<dyn LiveInstanceListener>,
    ) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<String>>();

        {
            let _guard = lock(&self.membership_lock);
            // Initial callback with the current membership.
            let _ = sender.send(self.live_instances());
            self.listeners
                .insert(role_id.to_string(), ListenerSlot { session, sender });
        }

        tokio::spawn(async move {
            while let Some(live) = receiver.recv().await {
                listener.on_live_instance_change(live).await;
            }
        });
    }
}

struct CoordinatorState {
    address: String,
    reachable: AtomicBool,
    sessions: DashSet<SessionId>,
    clusters: DashMap<String, Arc<ClusterState>>,
    failing_reads: DashSet<String>,
    read_delays: DashMap<String, Duration>,
}

impl CoordinatorState {
    fn cluster(&self, name: &str) -> Result<Arc<ClusterState>, CoordinationError> {
        self.clusters
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinationError::ClusterNotFound(name.to_string()))
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Drops a session and everything it owns.
    fn expire_session(&self, session: SessionId) {
        self.sessions.remove(&session);

        let clusters: Vec<Arc<ClusterState>> = self
            .clusters
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for cluster in clusters {
            cluster.listeners.retain(|_, slot| slot.session != session);
            cluster.participants.retain(|_, participant| {
                if participant.session == session {
                    participant.started.store(false, Ordering::SeqCst);
                    false
                } else {
                    true
                }
            });
            cluster.update_live(|live| {
                let before = live.len();
                live.retain(|_, owner| *owner != session);
                live.len() != before
            });
        }

        tracing::debug!("Session {} expired", session);
    }
}

/// Handle on an embedded coordination service. Cheap to clone.
#[derive(Clone)]
pub struct InMemoryCoordinator {
    state: Arc<CoordinatorState>,
}

impl InMemoryCoordinator {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            state: Arc::new(CoordinatorState {
                address: address.into(),
                reachable: AtomicBool::new(true),
                sessions: DashSet::new(),
                clusters: DashMap::new(),
                failing_reads: DashSet::new(),
                read_delays: DashMap::new(),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.state.address
    }

    /// Creates a cluster. Returns `false` if it already existed.
    pub fn add_cluster(&self, name: &str) -> bool {
        match self.state.clusters.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(ClusterState::default()));
                tracing::info!("Created cluster {}", name);
                true
            }
        }
    }

    /// A new, not yet connected client that will dial `address`.
    pub fn client(&self, address: &str) -> Arc<InMemoryClient> {
        Arc::new(InMemoryClient {
            state: self.state.clone(),
            address: address.to_string(),
            session: Mutex::new(None),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn live_instances(&self, cluster: &str) -> Vec<String> {
        self.state
            .cluster(cluster)
            .map(|c| c.live_instances())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, cluster: &str) -> usize {
        self.state
            .cluster(cluster)
            .map(|c| c.listeners.len())
            .unwrap_or(0)
    }

    pub fn instance_count(&self, cluster: &str) -> usize {
        self.state
            .cluster(cluster)
            .map(|c| c.records.len())
            .unwrap_or(0)
    }

    /// Marks an instance live without a participant session behind it.
    pub fn force_live(&self, cluster: &str, instance: &str) -> Result<(), CoordinationError> {
        let cluster = self.state.cluster(cluster)?;
        cluster.update_live(|live| live.insert(instance.to_string(), NO_SESSION).is_none());
        Ok(())
    }

    pub fn force_dead(&self, cluster: &str, instance: &str) -> Result<(), CoordinationError> {
        let cluster = self.state.cluster(cluster)?;
        cluster.update_live(|live| live.remove(instance).is_some());
        Ok(())
    }

    /// Every subsequent config read for `instance` fails.
    pub fn fail_config_reads(&self, instance: &str) {
        self.state.failing_reads.insert(instance.to_string());
    }

    /// Every subsequent config read for `instance` is delayed by `delay`.
    pub fn delay_config_reads(&self, instance: &str, delay: Duration) {
        self.state.read_delays.insert(instance.to_string(), delay);
    }

    /// Overwrites an instance record with bytes that do not decode.
    pub fn corrupt_instance_config(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<(), CoordinationError> {
        let cluster = self.state.cluster(cluster)?;
        cluster
            .records
            .insert(instance.to_string(), vec![0xff, 0x01]);
        Ok(())
    }

    /// Delivers a transition command to a started participant and returns
    /// the partition's resulting state.
    pub fn send_transition(
        &self,
        cluster: &str,
        instance: &str,
        message: &TransitionMessage,
    ) -> Result<PartitionState, CoordinationError> {
        self.participant(cluster, instance)?.deliver(message)
    }

    pub fn partition_state(
        &self,
        cluster: &str,
        instance: &str,
        partition: &str,
    ) -> Option<PartitionState> {
        let participant = self.participant(cluster, instance).ok()?;
        participant
            .handlers
            .get(&PartitionId(partition.to_string()))
            .map(|handler| handler.state())
    }

    /// Removes a partition assignment, destroying its handler.
    pub fn drop_partition(&self, cluster: &str, instance: &str, partition: &str) -> bool {
        match self.participant(cluster, instance) {
            Ok(participant) => participant
                .handlers
                .remove(&PartitionId(partition.to_string()))
                .is_some(),
            Err(_) => false,
        }
    }

    fn participant(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<Arc<InMemoryParticipant>, CoordinationError> {
        self.state
            .cluster(cluster)?
            .participants
            .get(instance)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinationError::ParticipantNotStarted(instance.to_string()))
    }
}

/// A session-based connection to an [`InMemoryCoordinator`].
pub struct InMemoryClient {
    state: Arc<CoordinatorState>,
    address: String,
    session: Mutex<Option<SessionId>>,
}

impl InMemoryClient {
    fn session(&self) -> Result<SessionId, CoordinationError> {
        if !self.state.is_reachable() {
            return Err(CoordinationError::Unreachable(self.address.clone()));
        }

        match *lock(&self.session) {
            Some(id) if self.state.sessions.contains(&id) => Ok(id),
            _ => Err(CoordinationError::NotConnected),
        }
    }
}

#[async_trait]
impl CoordinationClient for InMemoryClient {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        match *lock(&self.session) {
            Some(id) => self.state.sessions.contains(&id),
            None => false,
        }
    }

    async fn connect(&self) -> Result<(), CoordinationError> {
        if !self.state.is_reachable() || self.address != self.state.address {
            return Err(CoordinationError::Unreachable(self.address.clone()));
        }

        let mut session = lock(&self.session);
        if let Some(id) = *session
            && self.state.sessions.contains(&id)
        {
            return Ok(());
        }

        let id = Uuid::new_v4();
        self.state.sessions.insert(id);
        *session = Some(id);
        tracing::debug!("Opened session {} to {}", id, self.address);

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoordinationError> {
        let session = lock(&self.session).take();

        let Some(id) = session else {
            return Ok(());
        };

        self.state.expire_session(id);

        if self.state.is_reachable() {
            Ok(())
        } else {
            Err(CoordinationError::Unreachable(self.address.clone()))
        }
    }

    async fn add_live_instance_listener(
        &self,
        cluster: &str,
        role_id: &str,
        listener: Arc<dyn LiveInstanceListener>,
    ) -> Result<(), CoordinationError> {
        let session = self.session()?;
        self.state
            .cluster(cluster)?
            .add_listener(role_id, session, listener);
        Ok(())
    }

    async fn remove_live_instance_listener(
        &self,
        cluster: &str,
        role_id: &str,
    ) -> Result<(), CoordinationError> {
        self.session()?;
        self.state.cluster(cluster)?.listeners.remove(role_id);
        Ok(())
    }

    async fn instance_config(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<Option<InstanceRecord>, CoordinationError> {
        self.session()?;

        let delay = self.state.read_delays.get(instance).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.failing_reads.contains(instance) {
            return Err(CoordinationError::Unreachable(self.address.clone()));
        }

        let cluster_state = self.state.cluster(cluster)?;
        let bytes = match cluster_state.records.get(instance) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        bincode::deserialize::<InstanceRecord>(&bytes)
            .map(Some)
            .map_err(|e| CoordinationError::MalformedRecord {
                key: config_key(cluster, instance),
                reason: e.to_string(),
            })
    }

    async fn instances_in_cluster(&self, cluster: &str) -> Result<Vec<String>, CoordinationError> {
        self.session()?;

        let mut names: Vec<String> = self
            .state
            .cluster(cluster)?
            .records
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();

        Ok(names)
    }

    async fn add_instance(
        &self,
        cluster: &str,
        record: InstanceRecord,
    ) -> Result<(), CoordinationError> {
        self.session()?;
        let cluster_state = self.state.cluster(cluster)?;

        let encoded =
            bincode::serialize(&record).map_err(|e| CoordinationError::MalformedRecord {
                key: config_key(cluster, &record.instance_name),
                reason: e.to_string(),
            })?;

        match cluster_state.records.entry(record.instance_name.clone()) {
            Entry::Occupied(_) => Err(CoordinationError::InstanceExists(record.instance_name)),
            Entry::Vacant(vacant) => {
                vacant.insert(encoded);
                Ok(())
            }
        }
    }

    async fn create_participant(
        &self,
        cluster: &str,
        participant_id: &str,
    ) -> Result<Arc<dyn Participant>, CoordinationError> {
        let session = self.session()?;
        let cluster_state = self.state.cluster(cluster)?;

        let participant = Arc::new(InMemoryParticipant {
            id: participant_id.to_string(),
            session,
            cluster: Arc::downgrade(&cluster_state),
            state: self.state.clone(),
            factories: DashMap::new(),
            handlers: DashMap::new(),
            started: AtomicBool::new(false),
        });

        cluster_state
            .participants
            .insert(participant_id.to_string(), participant.clone());

        Ok(participant)
    }
}

pub struct InMemoryParticipant {
    id: String,
    session: SessionId,
    cluster: Weak<ClusterState>,
    state: Arc<CoordinatorState>,
    factories: DashMap<StateModelDefId, Arc<dyn StateModelFactory>>,
    handlers: DashMap<PartitionId, Box<dyn TransitionHandler>>,
    started: AtomicBool,
}

impl InMemoryParticipant {
    fn cluster(&self) -> Result<Arc<ClusterState>, CoordinationError> {
        self.cluster
            .upgrade()
            .ok_or_else(|| CoordinationError::ParticipantNotStarted(self.id.clone()))
    }

    fn deliver(&self, message: &TransitionMessage) -> Result<PartitionState, CoordinationError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(CoordinationError::ParticipantNotStarted(self.id.clone()));
        }

        let factory = self
            .factories
            .get(&message.state_model)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinationError::NoStateModel(message.state_model.0.clone()))?;

        let mut handler = self
            .handlers
            .entry(message.partition.clone())
            .or_insert_with(|| factory.create_handler(&message.partition));

        let current = handler.state();
        if current != message.from {
            return Err(CoordinationError::StaleTransition {
                partition: message.partition.0.clone(),
                expected: message.from,
                actual: current,
            });
        }

        handler.value_mut().handle(message)?;

        Ok(handler.state())
    }
}

#[async_trait]
impl Participant for InMemoryParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    fn register_state_model_factory(
        &self,
        model: StateModelDefId,
        factory: Arc<dyn StateModelFactory>,
    ) {
        tracing::debug!("Participant {} registered state model {}", self.id, model);
        self.factories.insert(model, factory);
    }

    async fn start(&self) -> Result<(), CoordinationError> {
        if !self.state.is_reachable() {
            return Err(CoordinationError::Unreachable(self.state.address.clone()));
        }
        if !self.state.sessions.contains(&self.session) {
            return Err(CoordinationError::NotConnected);
        }

        let cluster = self.cluster()?;
        if !cluster.records.contains_key(&self.id) {
            return Err(CoordinationError::InstanceNotFound(self.id.clone()));
        }

        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let session = self.session;
        cluster.update_live(|live| live.insert(self.id.clone(), session) != Some(session));

        Ok(())
    }

    async fn stop(&self) -> Result<(), CoordinationError> {
        if !self.state.is_reachable() {
            return Err(CoordinationError::Unreachable(self.state.address.clone()));
        }

        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.handlers.clear();

        if let Ok(cluster) = self.cluster() {
            let session = self.session;
            cluster.update_live(|live| {
                live.remove_if(&self.id, |_, owner| *owner == session)
                    .is_some()
            });
        }

        Ok(())
    }
}
