//! Diff-gated writer for one worker's store records.
//!
//! ## `update` protocol
//!
//! 1. For every desired node whose value differs from the mirror, `set` it
//!    (with the writer's TTL) and record it in the mirror.
//! 2. Only then, for every mirrored node absent from the desired map,
//!    compare-and-delete it against the mirrored value and drop it from the
//!    mirror.
//!
//! The mirror is updated after each successful store call, so a failure
//! part-way leaves it describing exactly what was written.

use std::sync::Arc;
use std::time::Duration;

use registrar_core::NodeMap;

use crate::error::{StoreError, SyncError};
use crate::store::KvStore;

// ---------------------------------------------------------------------------
// Update summary
// ---------------------------------------------------------------------------

/// Counts of store operations issued by one [`Writer::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub set: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl UpdateSummary {
    /// `true` when no store call was made.
    pub fn is_noop(&self) -> bool {
        self.set == 0 && self.deleted == 0
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Mirrors the nodes it wrote and converges the store towards each desired
/// map with the fewest operations.
pub struct Writer {
    store: Arc<dyn KvStore>,
    ttl: Option<Duration>,
    nodes: NodeMap,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("ttl", &self.ttl)
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl Writer {
    pub fn new(store: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self {
            store,
            ttl,
            nodes: NodeMap::new(),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// What this writer believes it has in the store.
    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    pub async fn update(&mut self, desired: &NodeMap) -> Result<UpdateSummary, SyncError> {
        let mut summary = UpdateSummary::default();

        for (path, value) in desired {
            if self.nodes.get(path) == Some(value) {
                summary.unchanged += 1;
                continue;
            }
            self.store.set(path, value, self.ttl).await?;
            tracing::debug!(node = %path, value = %value, "set node");
            self.nodes.insert(path.clone(), value.clone());
            summary.set += 1;
        }

        let stale: Vec<String> = self
            .nodes
            .keys()
            .filter(|path| !desired.contains_key(*path))
            .cloned()
            .collect();
        for path in stale {
            self.delete(&path).await?;
            summary.deleted += 1;
        }

        if !summary.is_noop() {
            tracing::info!(
                set = summary.set,
                unchanged = summary.unchanged,
                deleted = summary.deleted,
                "updated store",
            );
        }
        Ok(summary)
    }

    /// Re-arm the lease of every mirrored node. Returns how many were
    /// refreshed.
    pub async fn refresh(&mut self) -> Result<usize, SyncError> {
        let ttl = self.ttl.ok_or(SyncError::NoTtl)?;
        for path in self.nodes.keys() {
            self.store.refresh(path, ttl).await?;
        }
        tracing::debug!(nodes = self.nodes.len(), ttl = ?ttl, "refreshed leases");
        Ok(self.nodes.len())
    }

    /// Delete every mirrored node.
    pub async fn flush(&mut self) -> Result<usize, SyncError> {
        let summary = self.update(&NodeMap::new()).await?;
        Ok(summary.deleted)
    }

    async fn delete(&mut self, path: &str) -> Result<(), SyncError> {
        let Some(prev) = self.nodes.get(path) else {
            return Ok(());
        };
        match self.store.compare_and_delete(path, prev).await {
            Ok(()) => tracing::debug!(node = %path, "deleted node"),
            Err(StoreError::NotFound { .. }) => {
                tracing::debug!(node = %path, "node already gone");
            }
            Err(err) => return Err(err.into()),
        }
        self.nodes.remove(path);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Hands out writers bound to one shared store connection.
#[derive(Clone)]
pub struct WriterFactory {
    store: Arc<dyn KvStore>,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for WriterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterFactory")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl WriterFactory {
    pub fn new(store: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// A fresh writer with an empty mirror.
    pub fn writer(&self) -> Writer {
        Writer::new(Arc::clone(&self.store), self.ttl)
    }
}
