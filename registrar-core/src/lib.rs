//! Registrar core library — domain types, the observable broadcast slot,
//! policy configuration schemas and the static configuration loader.
//!
//! - [`types`] — container snapshots, names and node maps
//! - [`observable`] — [`Observable`], versioned latest-value broadcast
//! - [`config`] — [`ConfigSchema`] and immutable [`Config`] instances
//! - [`static_config`] — one-document-per-instance directory loader
//! - [`error`] — error enums shared by the other crates

pub mod config;
pub mod error;
pub mod observable;
pub mod static_config;
pub mod types;

pub use config::{Config, ConfigSchema, FieldKind, FieldSpec};
pub use error::{ConfigValidationError, ObservableError, StaticConfigError};
pub use observable::{Observable, Observer};
pub use types::{Container, ContainerId, ContainerState, InstanceName, NodeMap, PolicyName};
