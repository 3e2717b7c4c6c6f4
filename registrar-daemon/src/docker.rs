//! The container runtime collaborator and an in-process implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use registrar_core::ContainerId;

use crate::error::RuntimeError;

/// Event type the watcher acts on; everything else is ignored.
pub const CONTAINER_EVENT: &str = "container";

/// Action after which a container can no longer be inspected.
pub const DESTROY_ACTION: &str = "destroy";

/// One runtime lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// Object type, e.g. `container`, `network`, `image`.
    pub kind: String,
    /// e.g. `create`, `start`, `die`, `destroy`.
    pub action: String,
    pub id: ContainerId,
}

impl RuntimeEvent {
    pub fn container(action: impl Into<String>, id: impl Into<ContainerId>) -> Self {
        Self {
            kind: CONTAINER_EVENT.to_string(),
            action: action.into(),
            id: id.into(),
        }
    }

    pub fn is_container(&self) -> bool {
        self.kind == CONTAINER_EVENT
    }

    pub fn is_destroy(&self) -> bool {
        self.action == DESTROY_ACTION
    }
}

pub type EventStream = BoxStream<'static, Result<RuntimeEvent, RuntimeError>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Ids of every container, stopped ones included.
    async fn list(&self) -> Result<Vec<ContainerId>, RuntimeError>;

    /// Subscribe to lifecycle events from now on.
    async fn events(&self) -> Result<EventStream, RuntimeError>;

    /// The inspect document of `id`, or `None` if it no longer exists.
    async fn inspect(&self, id: &ContainerId) -> Result<Option<Value>, RuntimeError>;
}

// ---------------------------------------------------------------------------
// MemoryRuntime
// ---------------------------------------------------------------------------

type EventSender = mpsc::UnboundedSender<Result<RuntimeEvent, RuntimeError>>;

#[derive(Debug, Default)]
struct Inner {
    containers: BTreeMap<ContainerId, Value>,
    subscribers: Vec<EventSender>,
    unavailable: bool,
}

/// Containers held in memory. Mutations emit the matching events to every
/// live subscriber.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuntime {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn broadcast(inner: &mut Inner, event: Result<RuntimeEvent, RuntimeError>) {
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Add a container without emitting anything.
    pub fn insert(&self, id: impl Into<ContainerId>, inspect: Value) {
        self.lock().containers.insert(id.into(), inspect);
    }

    /// Remove a container without emitting anything.
    pub fn remove(&self, id: impl Into<ContainerId>) {
        self.lock().containers.remove(&id.into());
    }

    /// Add or replace a container and emit `start`.
    pub fn start(&self, id: impl Into<ContainerId>, inspect: Value) {
        let id = id.into();
        let mut inner = self.lock();
        inner.containers.insert(id.clone(), inspect);
        Self::broadcast(&mut inner, Ok(RuntimeEvent::container("start", id)));
    }

    /// Remove a container and emit `destroy`.
    pub fn destroy(&self, id: impl Into<ContainerId>) {
        let id = id.into();
        let mut inner = self.lock();
        inner.containers.remove(&id);
        Self::broadcast(&mut inner, Ok(RuntimeEvent::container(DESTROY_ACTION, id)));
    }

    /// Emit an arbitrary event without touching the containers.
    pub fn emit(&self, event: RuntimeEvent) {
        Self::broadcast(&mut self.lock(), Ok(event));
    }

    /// Break every open event stream and, while unavailable, fail new calls.
    pub fn set_available(&self, available: bool) {
        let mut inner = self.lock();
        inner.unavailable = !available;
        if !available {
            Self::broadcast(
                &mut inner,
                Err(RuntimeError::Unavailable("connection reset".to_string())),
            );
            inner.subscribers.clear();
        }
    }

    /// Number of open event streams.
    pub fn subscribers(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|subscriber| !subscriber.is_closed());
        inner.subscribers.len()
    }

    fn check(inner: &Inner) -> Result<(), RuntimeError> {
        if inner.unavailable {
            return Err(RuntimeError::Unavailable("runtime offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn list(&self) -> Result<Vec<ContainerId>, RuntimeError> {
        let inner = self.lock();
        Self::check(&inner)?;
        Ok(inner.containers.keys().cloned().collect())
    }

    async fn events(&self) -> Result<EventStream, RuntimeError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<Option<Value>, RuntimeError> {
        let inner = self.lock();
        Self::check(&inner)?;
        Ok(inner.containers.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mutations_are_streamed_to_subscribers() {
        let runtime = MemoryRuntime::new();
        let mut events = runtime.events().await.expect("events");

        runtime.start("c1", json!({ "Name": "/one" }));
        runtime.destroy("c1");

        let started = events.next().await.expect("event").expect("ok");
        assert_eq!(started, RuntimeEvent::container("start", "c1"));
        let destroyed = events.next().await.expect("event").expect("ok");
        assert!(destroyed.is_destroy());
        assert!(runtime.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn going_offline_breaks_streams() {
        let runtime = MemoryRuntime::new();
        let mut events = runtime.events().await.expect("events");
        runtime.set_available(false);

        assert!(events.next().await.expect("item").is_err());
        assert!(events.next().await.is_none());
        assert!(runtime.inspect(&ContainerId::from("c1")).await.is_err());
        assert_eq!(runtime.subscribers(), 0);
    }
}
