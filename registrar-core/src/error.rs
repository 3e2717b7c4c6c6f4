//! Error types for registrar-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::InstanceName;

/// Errors raised by [`crate::Observable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservableError {
    /// The observable was closed: no further updates are accepted, and no
    /// value was ever produced for a pending `get`.
    #[error("observable is closed")]
    Closed,
}

/// A configuration document that does not satisfy its policy's schema.
///
/// The offending instance is skipped; other instances are unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    #[error("config {instance}: expected a mapping document, got {found}")]
    NotAnObject {
        instance: InstanceName,
        found: &'static str,
    },

    #[error("config {instance}: unknown field '{field}'")]
    UnknownField {
        instance: InstanceName,
        field: String,
    },

    #[error("config {instance}: missing required field '{field}'")]
    MissingField {
        instance: InstanceName,
        field: String,
    },

    #[error("config {instance}: field '{field}' must be a {expected}")]
    WrongType {
        instance: InstanceName,
        field: String,
        expected: &'static str,
    },

    /// The raw document could not be decoded at all.
    #[error("config {instance}: {message}")]
    Malformed {
        instance: InstanceName,
        message: String,
    },
}

/// Errors from loading the static configuration directory.
///
/// Per-document problems are logged and skipped; only failures to read the
/// directory itself surface here.
#[derive(Debug, Error)]
pub enum StaticConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StaticConfigError {
    StaticConfigError::Io {
        path: path.into(),
        source,
    }
}
