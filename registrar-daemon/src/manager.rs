//! Reconciles configuration snapshots to running workers.
//!
//! Each snapshot is applied in two passes. **Sync up** creates a worker for
//! every new `(policy, instance)` and reloads every existing configured one.
//! **Sync down** removes workers whose key is gone. A failure on one entry is
//! logged and counted; it never aborts the pass.
//!
//! Every started worker is supervised: its exit is delivered back over a
//! channel, and an exit the manager did not ask for restarts the same
//! `(policy, instance, config)` under a new worker id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use registrar_core::{Config, ContainerState, Observable};
use registrar_policy::Policy;
use registrar_sync::WriterFactory;

use crate::configuration::ConfigState;
use crate::error::WorkerError;
use crate::worker::{InstanceKey, Worker, WorkerHandle, WorkerId};

/// Counts from applying one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub created: usize,
    pub reloaded: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Running totals over the manager's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub snapshots: usize,
    pub created: usize,
    pub reloaded: usize,
    pub removed: usize,
    pub failed: usize,
    pub restarted: usize,
}

impl ManagerStats {
    fn record(&mut self, summary: &ApplySummary) {
        self.snapshots += 1;
        self.created += summary.created;
        self.reloaded += summary.reloaded;
        self.removed += summary.removed;
        self.failed += summary.failed;
    }
}

#[derive(Debug)]
struct WorkerExit {
    id: WorkerId,
    result: Result<(), WorkerError>,
}

struct Registration {
    handle: WorkerHandle,
    config: Option<Arc<Config>>,
}

/// What is needed to start an instance again after a crash.
struct Recovery {
    key: InstanceKey,
    policy: Arc<Policy>,
    config: Option<Arc<Config>>,
}

pub struct Manager {
    containers: Arc<Observable<ContainerState>>,
    writers: WriterFactory,
    workers: BTreeMap<InstanceKey, Registration>,
    recovery: HashMap<WorkerId, Recovery>,
    next_id: u64,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
    exit_rx: mpsc::UnboundedReceiver<WorkerExit>,
    stats: ManagerStats,
}

impl Manager {
    pub fn new(containers: Arc<Observable<ContainerState>>, writers: WriterFactory) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            containers,
            writers,
            workers: BTreeMap::new(),
            recovery: HashMap::new(),
            next_id: 0,
            exit_tx,
            exit_rx,
            stats: ManagerStats::default(),
        }
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    /// Registered keys and the id of the worker currently serving each.
    pub fn status(&self) -> Vec<(InstanceKey, WorkerId)> {
        self.workers
            .iter()
            .map(|(key, registration)| (key.clone(), registration.handle.id()))
            .collect()
    }

    /// The config most recently applied to `key`'s worker.
    pub fn applied_config(&self, key: &InstanceKey) -> Option<&Arc<Config>> {
        self.workers.get(key)?.config.as_ref()
    }

    /// Follow `configs` until it closes, then stop every worker.
    pub async fn run(mut self, configs: Arc<Observable<ConfigState>>) -> ManagerStats {
        let mut observer = configs.observer();
        loop {
            tokio::select! {
                biased;
                Some(exit) = self.exit_rx.recv() => self.reap(exit),
                state = observer.next() => match state {
                    Some(state) => {
                        self.apply(&state).await;
                    }
                    None => break,
                },
            }
        }
        self.shutdown().await;
        tracing::info!(
            snapshots = self.stats.snapshots,
            restarted = self.stats.restarted,
            "manager stopped",
        );
        self.stats
    }

    /// Converge the running workers to `state`.
    pub async fn apply(&mut self, state: &ConfigState) -> ApplySummary {
        let mut summary = ApplySummary::default();
        let wanted = state.instances();

        // sync up
        for (key, policy, config) in &wanted {
            if self.workers.contains_key(key) {
                if config.is_some() {
                    self.reload(key, config.cloned(), &mut summary).await;
                }
            } else if self.create(key.clone(), Arc::clone(policy), config.cloned()) {
                summary.created += 1;
            } else {
                summary.failed += 1;
            }
        }

        // sync down
        let stale: Vec<InstanceKey> = self
            .workers
            .keys()
            .filter(|key| !wanted.iter().any(|(candidate, _, _)| candidate == *key))
            .cloned()
            .collect();
        for key in stale {
            self.remove(&key).await;
            summary.removed += 1;
        }

        self.stats.record(&summary);
        if summary != ApplySummary::default() {
            tracing::info!(
                created = summary.created,
                reloaded = summary.reloaded,
                removed = summary.removed,
                failed = summary.failed,
                "applied configuration",
            );
        }
        summary
    }

    /// Stop every worker, flushing its records.
    pub async fn shutdown(&mut self) {
        let keys: Vec<InstanceKey> = self.workers.keys().cloned().collect();
        for key in keys {
            self.remove(&key).await;
        }
    }

    fn create(&mut self, key: InstanceKey, policy: Arc<Policy>, config: Option<Arc<Config>>) -> bool {
        self.next_id += 1;
        let id = WorkerId(self.next_id);
        let worker = match Worker::new(
            id,
            key.clone(),
            Arc::clone(&policy),
            config.clone(),
            Arc::clone(&self.containers),
            self.writers.writer(),
        ) {
            Ok(worker) => worker,
            Err(err) => {
                tracing::error!(policy = %key, error = %err, "cannot create worker");
                return false;
            }
        };

        let (handle, join) = worker.start();
        let exits = self.exit_tx.clone();
        let panic_key = key.clone();
        tokio::spawn(async move {
            let result = match join.await {
                Ok(result) => result,
                Err(err) => Err(WorkerError::Panicked {
                    key: panic_key,
                    message: err.to_string(),
                }),
            };
            let _ = exits.send(WorkerExit { id, result });
        });

        tracing::info!(policy = %key, worker = %id, "created worker");
        self.recovery.insert(
            id,
            Recovery {
                key: key.clone(),
                policy,
                config: config.clone(),
            },
        );
        self.workers.insert(key, Registration { handle, config });
        true
    }

    async fn reload(
        &mut self,
        key: &InstanceKey,
        config: Option<Arc<Config>>,
        summary: &mut ApplySummary,
    ) {
        let Some(registration) = self.workers.get_mut(key) else {
            return;
        };
        match registration.handle.reload(config.clone()).await {
            Ok(changed) => {
                if changed {
                    tracing::info!(policy = %key, "reloaded worker");
                }
                registration.config = config.clone();
                if let Some(recovery) = self.recovery.get_mut(&registration.handle.id()) {
                    recovery.config = config;
                }
                summary.reloaded += 1;
            }
            Err(err) => {
                tracing::error!(policy = %key, error = %err, "reload failed");
                summary.failed += 1;
            }
        }
    }

    async fn remove(&mut self, key: &InstanceKey) {
        let Some(registration) = self.workers.remove(key) else {
            return;
        };
        self.recovery.remove(&registration.handle.id());
        match registration.handle.stop().await {
            Ok(deleted) => tracing::info!(policy = %key, deleted, "removed worker"),
            Err(err) => tracing::warn!(policy = %key, error = %err, "worker did not stop cleanly"),
        }
    }

    fn reap(&mut self, exit: WorkerExit) {
        let Some(recovery) = self.recovery.remove(&exit.id) else {
            tracing::debug!(worker = %exit.id, "ignoring exit of removed worker");
            return;
        };
        match &exit.result {
            Ok(()) => tracing::warn!(policy = %recovery.key, worker = %exit.id, "worker exited unexpectedly"),
            Err(err) => tracing::error!(policy = %recovery.key, worker = %exit.id, error = %err, "worker crashed"),
        }

        if self
            .workers
            .get(&recovery.key)
            .is_some_and(|registration| registration.handle.id() == exit.id)
        {
            self.workers.remove(&recovery.key);
        }
        if self.create(recovery.key.clone(), recovery.policy, recovery.config) {
            self.stats.restarted += 1;
        } else {
            self.stats.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use registrar_core::{ConfigSchema, Container, ContainerId, FieldKind, InstanceName, PolicyName};
    use registrar_policy::{builtin, NodeValues};
    use registrar_sync::{MemoryStore, StoreOp};
    use serde_json::json;

    fn configs(names: &[&str]) -> ConfigState {
        let policy = Arc::new(builtin::skydns());
        let schema = policy.schema().cloned().expect("schema");
        let instances = names
            .iter()
            .map(|name| {
                let config = schema
                    .parse(&InstanceName::from(*name), &json!({ "network": name }))
                    .expect("valid");
                (InstanceName::from(*name), Arc::new(config))
            })
            .collect();
        ConfigState::new().with(policy, Some(instances))
    }

    fn manager(store: &MemoryStore) -> Manager {
        let containers = Arc::new(Observable::new());
        containers
            .update(
                [Container::from_inspect(
                    ContainerId::from("c1"),
                    json!({
                        "Name": "/c1",
                        "Config": { "Hostname": "one" },
                        "NetworkSettings": { "Networks": { "a": { "IPAddress": "10.0.0.1" } } },
                    }),
                )]
                .into_iter()
                .collect(),
            )
            .expect("open");
        Manager::new(containers, WriterFactory::new(Arc::new(store.clone()), None))
    }

    #[tokio::test]
    async fn create_reload_remove_counts() {
        let store = MemoryStore::new();
        let mut manager = manager(&store);

        let created = manager.apply(&configs(&["a"])).await;
        assert_eq!(
            created,
            ApplySummary {
                created: 1,
                ..Default::default()
            }
        );

        let reloaded = manager.apply(&configs(&["a"])).await;
        assert_eq!(
            reloaded,
            ApplySummary {
                reloaded: 1,
                ..Default::default()
            }
        );

        let removed = manager.apply(&ConfigState::new()).await;
        assert_eq!(
            removed,
            ApplySummary {
                removed: 1,
                ..Default::default()
            }
        );
        assert!(manager.status().is_empty());
        assert!(store.nodes().is_empty());
    }

    #[tokio::test]
    async fn failed_reload_keeps_applied_config() {
        let store = MemoryStore::new();
        let mut manager = manager(&store);
        manager.apply(&configs(&["a"])).await;
        let key = InstanceKey::new(PolicyName::from("skydns"), Some(InstanceName::from("a")));
        let before = manager.applied_config(&key).cloned().expect("applied");

        store.set_available(false);
        let policy = Arc::new(builtin::skydns());
        let schema = policy.schema().cloned().expect("schema");
        let config = schema
            .parse(
                &InstanceName::from("a"),
                &json!({ "network": "a", "domain": "other.local" }),
            )
            .expect("valid");
        let changed = ConfigState::new().with(
            policy,
            Some([(InstanceName::from("a"), Arc::new(config))].into_iter().collect()),
        );

        let summary = manager.apply(&changed).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(manager.applied_config(&key), Some(&before));
    }

    /// A `labels` policy publishing `/labels/<hostname>` = the instance's
    /// label, which panics once whenever `armed` is set.
    fn labelled(
        store: &MemoryStore,
        armed: Arc<AtomicBool>,
    ) -> (Manager, Arc<Observable<ContainerState>>, Arc<Policy>) {
        let policy = Policy::builder("labels", move |container: &Container, config: Option<&Config>| {
            if armed.swap(false, Ordering::SeqCst) {
                panic!("armed handler");
            }
            let label = config?.str("label")?;
            let mut nodes = NodeValues::new();
            nodes.insert(format!("/labels/{}", container.hostname()), json!(label));
            Some(nodes)
        })
        .config(ConfigSchema::new().required("label", FieldKind::String))
        .build();
        let containers = Arc::new(Observable::new());
        containers
            .update(
                [Container::from_inspect(
                    ContainerId::from("c1"),
                    json!({ "Name": "/c1", "Config": { "Hostname": "one" } }),
                )]
                .into_iter()
                .collect(),
            )
            .expect("open");
        let manager = Manager::new(
            containers.clone(),
            WriterFactory::new(Arc::new(store.clone()), None),
        );
        (manager, containers, Arc::new(policy))
    }

    fn labelled_state(policy: &Arc<Policy>, label: &str) -> ConfigState {
        let config = policy
            .schema()
            .expect("schema")
            .parse(&InstanceName::from("x"), &json!({ "label": label }))
            .expect("valid");
        ConfigState::new().with(
            Arc::clone(policy),
            Some([(InstanceName::from("x"), Arc::new(config))].into_iter().collect()),
        )
    }

    async fn next_exit(manager: &mut Manager) -> WorkerExit {
        tokio::time::timeout(Duration::from_secs(5), manager.exit_rx.recv())
            .await
            .expect("worker exit within timeout")
            .expect("exit channel open")
    }

    async fn eventually(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition within timeout");
    }

    #[tokio::test]
    async fn restart_replays_last_successfully_reloaded_config() {
        let store = MemoryStore::new();
        let armed = Arc::new(AtomicBool::new(false));
        let (mut manager, containers, policy) = labelled(&store, armed.clone());
        let key = InstanceKey::new(PolicyName::from("labels"), Some(InstanceName::from("x")));
        let node = |path: &str| store.nodes().get(path).cloned();

        manager.apply(&labelled_state(&policy, "a")).await;
        eventually(|| node("/labels/one").as_deref() == Some("a")).await;

        let summary = manager.apply(&labelled_state(&policy, "b")).await;
        assert_eq!(summary.reloaded, 1);
        eventually(|| node("/labels/one").as_deref() == Some("b")).await;

        // The reload to "c" cannot write, so the worker crashes and the
        // restart must come back with "b".
        store.set_available(false);
        let summary = manager.apply(&labelled_state(&policy, "c")).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(manager.applied_config(&key).and_then(|c| c.str("label")), Some("b"));
        let exit = next_exit(&mut manager).await;
        assert!(matches!(exit.result, Err(WorkerError::Sync { .. })), "{:?}", exit.result);

        store.set_available(true);
        store.clear_ops();
        manager.reap(exit);
        eventually(|| store.ops().contains(&StoreOp::Set("/labels/one".into()))).await;
        assert_eq!(node("/labels/one").as_deref(), Some("b"));

        // A panicking handler is replaced with the same config.
        armed.store(true, Ordering::SeqCst);
        containers
            .update(
                [
                    Container::from_inspect(
                        ContainerId::from("c1"),
                        json!({ "Name": "/c1", "Config": { "Hostname": "one" } }),
                    ),
                    Container::from_inspect(
                        ContainerId::from("c2"),
                        json!({ "Name": "/c2", "Config": { "Hostname": "two" } }),
                    ),
                ]
                .into_iter()
                .collect(),
            )
            .expect("open");
        let exit = next_exit(&mut manager).await;
        assert!(matches!(exit.result, Err(WorkerError::Panicked { .. })), "{:?}", exit.result);
        manager.reap(exit);
        eventually(|| node("/labels/two").as_deref() == Some("b")).await;

        assert_eq!(manager.applied_config(&key).and_then(|c| c.str("label")), Some("b"));
        assert_eq!(manager.stats().restarted, 2);
        manager.shutdown().await;
        assert!(store.nodes().is_empty());
    }

    #[tokio::test]
    async fn one_worker_per_key() {
        let store = MemoryStore::new();
        let mut manager = manager(&store);
        manager.apply(&configs(&["a", "b"])).await;
        manager.apply(&configs(&["b", "c"])).await;

        let keys: Vec<String> = manager
            .status()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect();
        assert_eq!(keys, vec!["skydns:b", "skydns:c"]);
        assert_eq!(manager.stats().created, 3);
        assert_eq!(manager.stats().removed, 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn configless_policy_is_created_once_and_never_reloaded() {
        let store = MemoryStore::new();
        let mut manager = manager(&store);
        let state = ConfigState::new().with(Arc::new(builtin::skydns_bridge()), None);

        assert_eq!(manager.apply(&state).await.created, 1);
        assert_eq!(manager.apply(&state).await, ApplySummary::default());
        assert_eq!(
            manager.status()[0].0,
            InstanceKey::new(PolicyName::from("skydns-bridge"), None)
        );
        manager.shutdown().await;
    }
}
