//! Host Application Lifecycle
//!
//! Components that need to run for the lifetime of the process implement
//! [`Managed`] and are registered with a [`LifecycleEnvironment`]. The
//! environment starts them in registration order and stops them in reverse.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A component started once at process startup and stopped once at shutdown.
#[async_trait]
pub trait Managed: Send + Sync {
    /// Name used in lifecycle log lines.
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

#[derive(Default)]
pub struct LifecycleEnvironment {
    managed: Vec<Arc<dyn Managed>>,
    started: usize,
}

impl LifecycleEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manage(&mut self, managed: Arc<dyn Managed>) {
        tracing::debug!("Managing {}", managed.name());
        self.managed.push(managed);
    }

    pub fn len(&self) -> usize {
        self.managed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managed.is_empty()
    }

    /// Starts every managed component in order.
    ///
    /// If one fails, the components already started are stopped again (in
    /// reverse) and the start error is returned. The failing component is
    /// not stopped; it must undo its own partial start.
    pub async fn start_all(&mut self) -> Result<()> {
        while self.started < self.managed.len() {
            let managed = self.managed[self.started].clone();
            tracing::info!("Starting {}", managed.name());

            if let Err(e) = managed.start().await {
                tracing::error!("Failed to start {}: {}", managed.name(), e);
                self.stop_all().await.ok();
                return Err(e);
            }

            self.started += 1;
        }

        Ok(())
    }

    /// Stops every started component in reverse order.
    ///
    /// Every component gets a stop attempt; the first error is returned.
    pub async fn stop_all(&mut self) -> Result<()> {
        let mut first_error = None;

        while self.started > 0 {
            self.started -= 1;
            let managed = self.managed[self.started].clone();
            tracing::info!("Stopping {}", managed.name());

            if let Err(e) = managed.stop().await {
                tracing::warn!("Failed to stop {}: {}", managed.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
