//! One running policy instance.
//!
//! A worker is a single tokio task owning a [`PolicyContext`], a reader of the
//! container observable and a private [`Writer`]. Its loop serializes three
//! inputs:
//!
//! - mailbox messages (`reload`, `stop`), answered over a oneshot reply
//! - new container snapshots, evaluated and written to the store
//! - the lease refresh timer, firing every half TTL
//!
//! Because everything runs on the one task, an operation in progress always
//! completes before the next message is looked at.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use registrar_core::{Config, ContainerState, InstanceName, Observable, Observer, PolicyName};
use registrar_policy::{Policy, PolicyContext};
use registrar_sync::{UpdateSummary, Writer};

use crate::error::WorkerError;

const MAILBOX_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// `(policy, instance)`; configurationless policies have no instance name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey {
    pub policy: PolicyName,
    pub instance: Option<InstanceName>,
}

impl InstanceKey {
    pub fn new(policy: PolicyName, instance: Option<InstanceName>) -> Self {
        Self { policy, instance }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}:{}", self.policy, instance),
            None => self.policy.fmt(f),
        }
    }
}

/// Unique per started worker; a restarted instance gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

enum WorkerMessage {
    Reload {
        config: Option<Arc<Config>>,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
    Stop {
        respond_to: oneshot::Sender<Result<usize, String>>,
    },
}

/// Caller side of a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    key: InstanceKey,
    mailbox: mpsc::Sender<WorkerMessage>,
    stopping: Arc<AtomicBool>,
}

impl fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerMessage::Reload { config, .. } => f
                .debug_struct("Reload")
                .field("config", &config.as_ref().map(|c| c.name()))
                .finish_non_exhaustive(),
            WorkerMessage::Stop { .. } => f.debug_struct("Stop").finish_non_exhaustive(),
        }
    }
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Swap in a new config and re-evaluate. Returns `false` when the config
    /// equals the one already applied and nothing was done.
    pub async fn reload(&self, config: Option<Arc<Config>>) -> Result<bool, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.send(WorkerMessage::Reload {
            config,
            respond_to: tx,
        })
        .await?;
        let outcome = rx.await.map_err(|_| self.closed("reload response"))?;
        outcome.map_err(|message| WorkerError::Reload {
            key: self.key.clone(),
            message,
        })
    }

    /// Delete every record this worker wrote and end its task. Returns the
    /// number of records deleted.
    ///
    /// The stopping flag is raised before the request is queued, so no
    /// update or refresh starts after this call begins.
    pub async fn stop(&self) -> Result<usize, WorkerError> {
        self.stopping.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.send(WorkerMessage::Stop { respond_to: tx }).await?;
        let outcome = rx.await.map_err(|_| self.closed("stop response"))?;
        outcome.map_err(|message| WorkerError::Stop {
            key: self.key.clone(),
            message,
        })
    }

    async fn send(&self, message: WorkerMessage) -> Result<(), WorkerError> {
        self.mailbox
            .send(message)
            .await
            .map_err(|_| self.closed("mailbox"))
    }

    fn closed(&self, channel: &'static str) -> WorkerError {
        WorkerError::ChannelClosed {
            key: self.key.clone(),
            channel,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker {
    id: WorkerId,
    key: InstanceKey,
    context: PolicyContext,
    containers: Arc<Observable<ContainerState>>,
    writer: Writer,
}

impl Worker {
    /// Bind `config` to `policy`. Fails if the config does not fit the
    /// policy's schema requirements.
    pub fn new(
        id: WorkerId,
        key: InstanceKey,
        policy: Arc<Policy>,
        config: Option<Arc<Config>>,
        containers: Arc<Observable<ContainerState>>,
        writer: Writer,
    ) -> Result<Self, WorkerError> {
        let context = PolicyContext::new(policy, config).map_err(|source| WorkerError::Init {
            key: key.clone(),
            source,
        })?;
        Ok(Self {
            id,
            key,
            context,
            containers,
            writer,
        })
    }

    /// Spawn the worker task.
    pub fn start(self) -> (WorkerHandle, JoinHandle<Result<(), WorkerError>>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let stopping = Arc::new(AtomicBool::new(false));
        let handle = WorkerHandle {
            id: self.id,
            key: self.key.clone(),
            mailbox: tx,
            stopping: stopping.clone(),
        };
        let task = WorkerTask {
            observer: self.containers.observer(),
            refresh: self.writer.ttl().map(refresh_interval),
            worker: self,
            mailbox: rx,
            stopping,
        };
        (handle, tokio::spawn(task.run()))
    }
}

fn refresh_interval(ttl: Duration) -> Interval {
    let period = (ttl / 2).max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

struct WorkerTask {
    worker: Worker,
    observer: Observer<ContainerState>,
    refresh: Option<Interval>,
    mailbox: mpsc::Receiver<WorkerMessage>,
    stopping: Arc<AtomicBool>,
}

impl WorkerTask {
    async fn run(mut self) -> Result<(), WorkerError> {
        tracing::info!(worker = %self.worker.id, policy = %self.worker.key, "worker started");
        let mut containers_open = true;

        loop {
            tokio::select! {
                biased;
                message = self.mailbox.recv() => match message {
                    Some(WorkerMessage::Reload { config, respond_to }) => {
                        match self.reload(config).await {
                            Ok(changed) => {
                                let _ = respond_to.send(Ok(changed));
                            }
                            // The store failed mid-write; the manager restarts us.
                            Err(err @ WorkerError::Sync { .. }) => {
                                let _ = respond_to.send(Err(err.to_string()));
                                return Err(err);
                            }
                            Err(WorkerError::Reload { message, .. }) => {
                                let _ = respond_to.send(Err(message));
                            }
                            Err(err) => {
                                let _ = respond_to.send(Err(err.to_string()));
                            }
                        }
                    }
                    Some(WorkerMessage::Stop { respond_to }) => {
                        let outcome = self.worker.writer.flush().await;
                        match &outcome {
                            Ok(deleted) => tracing::info!(
                                worker = %self.worker.id,
                                policy = %self.worker.key,
                                deleted,
                                "worker stopped",
                            ),
                            Err(err) => tracing::warn!(
                                worker = %self.worker.id,
                                policy = %self.worker.key,
                                error = %err,
                                "worker stopped without flushing",
                            ),
                        }
                        let _ = respond_to.send(outcome.map_err(|err| err.to_string()));
                        return Ok(());
                    }
                    None => {
                        // Every handle is gone; nobody can stop us any more.
                        self.stopping.store(true, Ordering::SeqCst);
                        self.worker.writer.flush().await.map_err(|source| self.sync_error(source))?;
                        return Ok(());
                    }
                },
                state = self.observer.next(), if containers_open => match state {
                    Some(state) => {
                        if self.refuse("update") {
                            continue;
                        }
                        self.sync(&state).await?;
                    }
                    None => {
                        tracing::debug!(policy = %self.worker.key, "container observable closed");
                        containers_open = false;
                    }
                },
                _ = tick(&mut self.refresh) => {
                    if self.refuse("refresh") {
                        continue;
                    }
                    let refreshed = self
                        .worker
                        .writer
                        .refresh()
                        .await
                        .map_err(|source| self.sync_error(source))?;
                    tracing::debug!(policy = %self.worker.key, refreshed, "refreshed records");
                }
            }
        }
    }

    fn refuse(&self, operation: &'static str) -> bool {
        let stopping = self.stopping.load(Ordering::SeqCst);
        if stopping {
            tracing::warn!(
                worker = %self.worker.id,
                policy = %self.worker.key,
                operation,
                "refusing operation on stopping worker",
            );
        }
        stopping
    }

    async fn reload(&mut self, config: Option<Arc<Config>>) -> Result<bool, WorkerError> {
        if self.worker.context.config().map(|c| c.as_ref()) == config.as_deref() {
            tracing::debug!(policy = %self.worker.key, "config unchanged");
            return Ok(false);
        }

        let policy = Arc::clone(self.worker.context.policy());
        self.worker.context =
            PolicyContext::new(policy, config).map_err(|err| WorkerError::Reload {
                key: self.worker.key.clone(),
                message: err.to_string(),
            })?;
        tracing::info!(policy = %self.worker.key, "config reloaded");

        if self.refuse("update") {
            return Ok(true);
        }
        if let Some(state) = self.worker.containers.current() {
            self.sync(&state).await?;
        }
        Ok(true)
    }

    async fn sync(&mut self, state: &ContainerState) -> Result<UpdateSummary, WorkerError> {
        let evaluation = self.worker.context.apply_all(state);
        if !evaluation.conflicts.is_empty() {
            tracing::debug!(
                policy = %self.worker.key,
                conflicts = evaluation.conflicts.len(),
                "evaluation had overlapping nodes",
            );
        }
        let summary = self
            .worker
            .writer
            .update(&evaluation.nodes)
            .await
            .map_err(|source| self.sync_error(source))?;
        tracing::debug!(
            policy = %self.worker.key,
            containers = state.len(),
            nodes = evaluation.nodes.len(),
            set = summary.set,
            deleted = summary.deleted,
            "synced",
        );
        Ok(summary)
    }

    fn sync_error(&self, source: registrar_sync::SyncError) -> WorkerError {
        WorkerError::Sync {
            key: self.worker.key.clone(),
            source,
        }
    }
}
