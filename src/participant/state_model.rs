//! ONLINE/OFFLINE State Model
//!
//! Each partition hosted by a participant gets its own [`OnlineOfflineHandler`],
//! created by [`OnlineOfflineStateModelFactory`]. A handler starts `OFFLINE`
//! and only ever applies the two modeled transitions:
//!
//! | from    | to      | hook                        |
//! |---------|---------|-----------------------------|
//! | OFFLINE | ONLINE  | [`TransitionHooks::on_online`]  |
//! | ONLINE  | OFFLINE | [`TransitionHooks::on_offline`] |

use crate::coordination::{PartitionId, StateModelFactory, TransitionHandler, TransitionMessage};
use crate::error::CoordinationError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionState {
    #[default]
    Offline,
    Online,
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionState::Offline => f.write_str("OFFLINE"),
            PartitionState::Online => f.write_str("ONLINE"),
        }
    }
}

/// Extension points run after a partition changes state.
///
/// Both methods default to doing nothing.
pub trait TransitionHooks: Send + Sync {
    /// The partition is now ONLINE (readiness).
    fn on_online(&self, _partition: &PartitionId) {}

    /// The partition is now OFFLINE (drain).
    fn on_offline(&self, _partition: &PartitionId) {}
}

pub struct OnlineOfflineHandler {
    partition: PartitionId,
    state: PartitionState,
    hooks: Option<Arc<dyn TransitionHooks>>,
}

impl OnlineOfflineHandler {
    pub fn new(partition: PartitionId, hooks: Option<Arc<dyn TransitionHooks>>) -> Self {
        Self {
            partition,
            state: PartitionState::Offline,
            hooks,
        }
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    fn become_online(&mut self) {
        tracing::info!("From OFFLINE to ONLINE: {}", self.partition);
        self.state = PartitionState::Online;
        if let Some(hooks) = &self.hooks {
            hooks.on_online(&self.partition);
        }
    }

    fn become_offline(&mut self) {
        tracing::info!("From ONLINE to OFFLINE: {}", self.partition);
        self.state = PartitionState::Offline;
        if let Some(hooks) = &self.hooks {
            hooks.on_offline(&self.partition);
        }
    }
}

impl TransitionHandler for OnlineOfflineHandler {
    fn state(&self) -> PartitionState {
        self.state
    }

    fn handle(&mut self, message: &TransitionMessage) -> Result<(), CoordinationError> {
        match (message.from, message.to) {
            (PartitionState::Offline, PartitionState::Online) => self.become_online(),
            (PartitionState::Online, PartitionState::Offline) => self.become_offline(),
            (from, to) => return Err(CoordinationError::IllegalTransition { from, to }),
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct OnlineOfflineStateModelFactory {
    hooks: Option<Arc<dyn TransitionHooks>>,
}

impl OnlineOfflineStateModelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hooks(hooks: Arc<dyn TransitionHooks>) -> Self {
        Self { hooks: Some(hooks) }
    }
}

impl StateModelFactory for OnlineOfflineStateModelFactory {
    fn create_handler(&self, partition: &PartitionId) -> Box<dyn TransitionHandler> {
        tracing::debug!("Creating ONLINE/OFFLINE handler for {}", partition);
        Box::new(OnlineOfflineHandler::new(
            partition.clone(),
            self.hooks.clone(),
        ))
    }
}
