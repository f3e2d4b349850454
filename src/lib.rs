//! Cluster Service Discovery Library
//!
//! Lets a fleet of service instances find each other through a shared
//! coordination service, and lets each instance take part in a per-partition
//! ONLINE/OFFLINE state machine.
//!
//! ## Architecture Modules
//! - **`discovery`**: The spectator side. `MembershipWatcher` follows live-instance
//!   notifications and publishes immutable endpoint snapshots for lock-free reads.
//! - **`participant`**: The participant side. `ParticipantRegistrar` registers this
//!   node as `<host>_<port>` and hosts the ONLINE/OFFLINE state model.
//! - **`coordination`**: The boundary to the coordination service, plus an embedded
//!   in-memory implementation.
//! - **`lifecycle`**: `Managed` components started and stopped with the host process.
//! - **`config`**: Cluster identity and node address resolution.
//! - **`error`**: Error kinds shared by all of the above.

pub mod config;
pub mod coordination;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod participant;

pub use error::{CoordinationError, DiscoveryError};
