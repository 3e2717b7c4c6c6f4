//! # registrar-policy
//!
//! Policies turn container snapshots into store nodes.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use registrar_core::{Container, ContainerId, ContainerState};
//! use registrar_policy::{NodeValues, Policy, PolicyContext};
//! use serde_json::json;
//!
//! let policy = Arc::new(
//!     Policy::builder("hosts", |container, _config| {
//!         let mut nodes = NodeValues::new();
//!         nodes.insert(format!("/hosts/{}", container.name()), json!(container.hostname()));
//!         Some(nodes)
//!     })
//!     .build(),
//! );
//!
//! let context = PolicyContext::new(policy, None).unwrap();
//! let state: ContainerState = [Container::from_inspect(
//!     ContainerId::from("c1"),
//!     json!({ "Name": "/web", "Config": { "Hostname": "web.local" } }),
//! )]
//! .into_iter()
//! .collect();
//! assert_eq!(context.apply_all(&state).nodes["/hosts/web"], "web.local");
//! ```

pub mod builtin;
pub mod error;
pub mod nodes;
pub mod policy;

pub use error::PolicyError;
pub use nodes::{encode_nodes, Conflict, Evaluation, NodeValues};
pub use policy::{ConfigSource, ContainerHandler, Policy, PolicyBuilder, PolicyContext};
