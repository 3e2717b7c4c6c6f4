//! In-process [`KvStore`] with TTL leases and an operation log.
//!
//! Expiry is evaluated lazily against `tokio::time::Instant`, so tests with a
//! paused clock can advance past a lease deterministically. Every mutating
//! call is recorded as a [`StoreOp`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::watch;
use tokio::time::Instant;

use registrar_core::NodeMap;

use crate::error::StoreError;
use crate::store::{KvStore, WatchStream};

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set(String),
    Refresh(String),
    Delete(String),
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, Entry>,
    ops: Vec<StoreOp>,
    unavailable: bool,
}

impl Inner {
    fn check(&mut self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        let now = Instant::now();
        self.nodes
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        Ok(())
    }

    fn list(&mut self, prefix: &str) -> Result<NodeMap, StoreError> {
        self.check()?;
        Ok(self
            .nodes
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, entry)| (path.clone(), entry.value.clone()))
            .collect())
    }
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    changes: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }
}

/// Cloneable handle; clones share the same nodes.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                changes,
            }),
        }
    }

    /// Live nodes, bypassing availability.
    pub fn nodes(&self) -> NodeMap {
        let mut inner = self.shared.lock();
        let unavailable = std::mem::replace(&mut inner.unavailable, false);
        let nodes = inner.list("").unwrap_or_default();
        inner.unavailable = unavailable;
        nodes
    }

    /// Remaining lease of `path`, if it has one.
    pub fn ttl(&self, path: &str) -> Option<Duration> {
        let inner = self.shared.lock();
        let expires_at = inner.nodes.get(path)?.expires_at?;
        Some(expires_at.saturating_duration_since(Instant::now()))
    }

    /// Recorded calls since creation or the last [`MemoryStore::clear_ops`].
    pub fn ops(&self) -> Vec<StoreOp> {
        self.shared.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.shared.lock().ops.clear();
    }

    /// While unavailable every trait call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.shared.lock().unavailable = !available;
    }

    /// Write a node directly, as another client would. Not logged.
    pub fn insert(&self, path: &str, value: &str) {
        self.shared.lock().nodes.insert(
            path.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        self.shared.changed();
    }

    /// Remove a node directly, as another client would. Not logged.
    pub fn remove(&self, path: &str) {
        self.shared.lock().nodes.remove(path);
        self.shared.changed();
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn version(&self) -> Result<String, StoreError> {
        self.shared.lock().check()?;
        Ok(concat!("memory-", env!("CARGO_PKG_VERSION")).to_string())
    }

    async fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        {
            let mut inner = self.shared.lock();
            inner.check()?;
            inner.nodes.insert(
                path.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            inner.ops.push(StoreOp::Set(path.to_string()));
        }
        self.shared.changed();
        Ok(())
    }

    async fn refresh(&self, path: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.shared.lock();
        inner.check()?;
        let entry = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })?;
        entry.expires_at = Some(Instant::now() + ttl);
        inner.ops.push(StoreOp::Refresh(path.to_string()));
        Ok(())
    }

    async fn compare_and_delete(&self, path: &str, prev_value: &str) -> Result<(), StoreError> {
        {
            let mut inner = self.shared.lock();
            inner.check()?;
            match inner.nodes.get(path) {
                None => {
                    return Err(StoreError::NotFound {
                        path: path.to_string(),
                    })
                }
                Some(entry) if entry.value != prev_value => {
                    return Err(StoreError::CompareFailed {
                        path: path.to_string(),
                    })
                }
                Some(_) => {}
            }
            inner.nodes.remove(path);
            inner.ops.push(StoreOp::Delete(path.to_string()));
        }
        self.shared.changed();
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<NodeMap, StoreError> {
        self.shared.lock().list(prefix)
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        self.shared.lock().check()?;

        struct WatchState {
            shared: Arc<Shared>,
            changes: watch::Receiver<u64>,
            prefix: String,
            last: Option<NodeMap>,
            failed: bool,
        }

        let state = WatchState {
            changes: self.shared.changes.subscribe(),
            shared: Arc::clone(&self.shared),
            prefix: prefix.to_string(),
            last: None,
            failed: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            if state.failed {
                return None;
            }
            loop {
                let listing = state.shared.lock().list(&state.prefix);
                match listing {
                    Err(err) => {
                        state.failed = true;
                        return Some((Err(err), state));
                    }
                    Ok(nodes) if state.last.as_ref() != Some(&nodes) => {
                        state.last = Some(nodes.clone());
                        return Some((Ok(nodes), state));
                    }
                    Ok(_) => {}
                }
                if state.changes.changed().await.is_err() {
                    return None;
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
