//! Service Discovery Module
//!
//! Spectator side of the cluster: watches which instances are live and
//! answers "where can I reach a service?" without touching the network on
//! the read path.
//!
//! ## Submodules
//! - **`types`**: `Endpoint` and the immutable `EndpointSnapshot`.
//! - **`watcher`**: `MembershipWatcher`, which turns live-instance
//!   notifications into published snapshots.
//! - **`handlers`**: HTTP exposure of the discovery API.

pub mod handlers;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use types::{Endpoint, EndpointSnapshot};
pub use watcher::{MembershipWatcher, WatcherOptions};
