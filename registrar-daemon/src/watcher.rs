//! Container state watcher.
//!
//! Publishes a complete [`ContainerState`] after the initial listing and
//! after every container event. Each published snapshot replaces the previous
//! one; readers never see deltas.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;

use registrar_core::{Container, ContainerId, ContainerState, Observable};

use crate::docker::{ContainerRuntime, RuntimeEvent};
use crate::error::RuntimeError;

pub struct Watcher {
    runtime: Arc<dyn ContainerRuntime>,
    observable: Arc<Observable<ContainerState>>,
    containers: BTreeMap<ContainerId, Arc<Container>>,
}

impl Watcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        observable: Arc<Observable<ContainerState>>,
    ) -> Self {
        Self {
            runtime,
            observable,
            containers: BTreeMap::new(),
        }
    }

    /// Follow the runtime until its event stream fails or ends.
    ///
    /// Returns `Ok` only when the observable was closed underneath it.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        // Subscribe first so nothing between the listing and the stream is
        // lost; replaying an event already covered by the baseline is harmless.
        let mut events = self.runtime.events().await?;
        self.sync_all().await?;
        if !self.publish() {
            return Ok(());
        }

        while let Some(event) = events.next().await {
            let event = event?;
            if !event.is_container() {
                tracing::trace!(kind = %event.kind, action = %event.action, "ignoring event");
                continue;
            }
            self.handle(&event).await?;
            if !self.publish() {
                return Ok(());
            }
        }
        Err(RuntimeError::EventsEnded)
    }

    async fn sync_all(&mut self) -> Result<(), RuntimeError> {
        let ids = self.runtime.list().await?;
        let mut containers = BTreeMap::new();
        for id in ids {
            match self.runtime.inspect(&id).await? {
                Some(inspect) => {
                    containers.insert(id.clone(), Arc::new(Container::from_inspect(id, inspect)));
                }
                None => tracing::debug!(container = %id, "container vanished before inspect"),
            }
        }
        tracing::info!(containers = containers.len(), "synced containers");
        self.containers = containers;
        Ok(())
    }

    async fn handle(&mut self, event: &RuntimeEvent) -> Result<(), RuntimeError> {
        if event.is_destroy() {
            self.remove(&event.id);
            return Ok(());
        }
        match self.runtime.inspect(&event.id).await? {
            Some(inspect) => {
                let container = Container::from_inspect(event.id.clone(), inspect);
                tracing::debug!(container = %container, action = %event.action, "container updated");
                self.containers.insert(event.id.clone(), Arc::new(container));
            }
            None => self.remove(&event.id),
        }
        Ok(())
    }

    fn remove(&mut self, id: &ContainerId) {
        if let Some(container) = self.containers.remove(id) {
            tracing::debug!(container = %container, "container removed");
        }
    }

    fn publish(&self) -> bool {
        let state = ContainerState::from(self.containers.clone());
        match self.observable.update(state) {
            Ok(version) => {
                tracing::trace!(version, containers = self.containers.len(), "published containers");
                true
            }
            Err(_) => {
                tracing::debug!("container observable closed; watcher exiting");
                false
            }
        }
    }
}
