//! Participant Module
//!
//! Registers this node as a live, addressable member of the cluster and hosts
//! the per-partition ONLINE/OFFLINE state machine driven by the coordination
//! service.
//!
//! ## Submodules
//! - **`state_model`**: `PartitionState`, the per-partition handler and its factory.
//! - **`registrar`**: `ParticipantRegistrar`, the connect/register/start lifecycle.
//! - **`bundle`**: `DiscoveryBundle`, wiring registrar and watcher into the host lifecycle.

pub mod bundle;
pub mod registrar;
pub mod state_model;


pub use bundle::DiscoveryBundle;
pub use registrar::ParticipantRegistrar;
pub use state_model::{
    OnlineOfflineHandler, OnlineOfflineStateModelFactory, PartitionState, TransitionHooks,
};
