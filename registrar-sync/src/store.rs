//! The distributed key-value store collaborator.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use registrar_core::NodeMap;

use crate::error::StoreError;

/// Stream of full node listings under a watched prefix. The first item is
/// the current listing; later items follow each change.
pub type WatchStream = BoxStream<'static, Result<NodeMap, StoreError>>;

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Server version, used as the startup reachability check.
    async fn version(&self) -> Result<String, StoreError>;

    /// Write `value` at `path`, expiring after `ttl` if given.
    async fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Re-arm the TTL of an existing node without changing its value.
    async fn refresh(&self, path: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete `path` only if it still holds `prev_value`.
    async fn compare_and_delete(&self, path: &str, prev_value: &str) -> Result<(), StoreError>;

    /// Every node whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<NodeMap, StoreError>;

    /// Follow the listing of `prefix`.
    async fn watch(&self, prefix: &str) -> Result<WatchStream, StoreError>;
}
