//! Error types for registrar-sync.

use thiserror::Error;

/// Failures reported by a [`crate::KvStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network or server failure; the caller's task is restarted.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The node does not exist (never written, deleted, or lease expired).
    #[error("node not found: {path}")]
    NotFound { path: String },

    /// Compare-and-delete found a different value than expected.
    #[error("compare failed for {path}")]
    CompareFailed { path: String },
}

/// All errors that can arise from writer operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// `refresh` on a writer constructed without a TTL.
    #[error("writer has no TTL to refresh")]
    NoTtl,
}
