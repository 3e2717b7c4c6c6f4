//! # registrar-sync
//!
//! Diff-based synchronization of desired nodes into the distributed store.
//!
//! A [`Writer`] mirrors what it last wrote and turns each desired
//! [`registrar_core::NodeMap`] into the minimal set of store operations,
//! renewing TTL leases with [`Writer::refresh`]. The store itself is the
//! [`KvStore`] trait; [`MemoryStore`] implements it in process.

pub mod error;
pub mod memory;
pub mod store;
pub mod writer;

pub use error::{StoreError, SyncError};
pub use memory::{MemoryStore, StoreOp};
pub use store::{KvStore, WatchStream};
pub use writer::{UpdateSummary, Writer, WriterFactory};
