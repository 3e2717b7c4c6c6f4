use std::path::PathBuf;

use thiserror::Error;

use crate::worker::InstanceKey;

/// Error surface for the daemon runtime and its settings.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings error in {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("store unreachable: {0}")]
    Store(#[from] registrar_sync::StoreError),

    #[error("policy error: {0}")]
    Policy(#[from] registrar_policy::PolicyError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

/// Failures talking to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Transport failure; the watcher terminates and is restarted.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container event stream ended")]
    EventsEnded,
}

/// Failures of one worker, reported to whoever called into it or, for the
/// task itself, to the manager.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {key}: cannot start: {source}")]
    Init {
        key: InstanceKey,
        #[source]
        source: registrar_policy::PolicyError,
    },

    #[error("worker {key}: reload failed: {message}")]
    Reload { key: InstanceKey, message: String },

    #[error("worker {key}: stop failed: {message}")]
    Stop { key: InstanceKey, message: String },

    #[error("worker {key}: sync failed: {source}")]
    Sync {
        key: InstanceKey,
        #[source]
        source: registrar_sync::SyncError,
    },

    #[error("worker {key}: {channel} closed")]
    ChannelClosed {
        key: InstanceKey,
        channel: &'static str,
    },

    #[error("worker {key} panicked: {message}")]
    Panicked { key: InstanceKey, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
