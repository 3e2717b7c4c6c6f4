//! Registrar daemon: container watcher, configuration aggregator and the
//! manager that keeps one worker running per policy instance.

pub mod configuration;
pub mod docker;
mod error;
pub mod manager;
pub mod runtime;
pub mod settings;
pub mod watcher;
pub mod worker;

pub use configuration::{ConfigState, Configuration, PolicyConfigs};
pub use docker::{ContainerRuntime, EventStream, MemoryRuntime, RuntimeEvent};
pub use error::{DaemonError, RuntimeError, WorkerError};
pub use manager::{ApplySummary, Manager, ManagerStats};
pub use runtime::{init_tracing, run_until, start_blocking};
pub use settings::Settings;
pub use watcher::Watcher;
pub use worker::{InstanceKey, Worker, WorkerHandle, WorkerId};
