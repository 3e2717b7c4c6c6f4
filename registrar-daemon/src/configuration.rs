//! Configuration aggregator.
//!
//! Every policy gets a source that reports its instance configs:
//!
//! | policy schema       | source                                               |
//! |---------------------|------------------------------------------------------|
//! | none                | one configurationless instance, reported once        |
//! | static only         | `<static_dir>/<policy>/*.{yaml,yml,json}`, read once |
//! | bound to a store    | static documents plus a watch of the store prefix    |
//!
//! Sources send whole per-policy slices to the aggregator task, which owns the
//! [`ConfigState`] and publishes a fresh snapshot after every slice.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use registrar_core::{static_config, Config, InstanceName, NodeMap, Observable, PolicyName};
use registrar_policy::{ConfigSource, Policy};
use registrar_sync::KvStore;

use crate::error::DaemonError;
use crate::worker::InstanceKey;

pub type Instances = BTreeMap<InstanceName, Arc<Config>>;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One policy's slice of the configuration.
#[derive(Debug, Clone)]
pub struct PolicyConfigs {
    pub policy: Arc<Policy>,
    /// `None` for a configurationless policy.
    pub instances: Option<Instances>,
}

/// Immutable view of every policy's instance configs.
#[derive(Debug, Clone, Default)]
pub struct ConfigState {
    policies: BTreeMap<PolicyName, PolicyConfigs>,
}

impl ConfigState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by tests and tooling.
    pub fn with(mut self, policy: Arc<Policy>, instances: Option<Instances>) -> Self {
        self.policies
            .insert(policy.name().clone(), PolicyConfigs { policy, instances });
        self
    }

    pub fn get(&self, policy: &PolicyName) -> Option<&PolicyConfigs> {
        self.policies.get(policy)
    }

    /// Every instance as `(key, policy, config)`, in key order.
    pub fn instances(&self) -> Vec<(InstanceKey, &Arc<Policy>, Option<&Arc<Config>>)> {
        let mut out = Vec::new();
        for (name, slice) in &self.policies {
            match &slice.instances {
                None => out.push((InstanceKey::new(name.clone(), None), &slice.policy, None)),
                Some(instances) => {
                    for (instance, config) in instances {
                        out.push((
                            InstanceKey::new(name.clone(), Some(instance.clone())),
                            &slice.policy,
                            Some(config),
                        ));
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PolicyUpdate {
    policy: Arc<Policy>,
    instances: Option<Instances>,
}

pub struct Configuration {
    policies: Vec<Arc<Policy>>,
    static_dir: PathBuf,
    store: Arc<dyn KvStore>,
    retry_delay: Duration,
    observable: Arc<Observable<ConfigState>>,
}

impl Configuration {
    pub fn new(
        policies: Vec<Arc<Policy>>,
        static_dir: impl Into<PathBuf>,
        store: Arc<dyn KvStore>,
        retry_delay: Duration,
        observable: Arc<Observable<ConfigState>>,
    ) -> Self {
        Self {
            policies,
            static_dir: static_dir.into(),
            store,
            retry_delay,
            observable,
        }
    }

    /// Start every source and publish snapshots until shutdown. The
    /// observable is closed on return.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let result = self.aggregate(&mut shutdown_rx).await;
        self.observable.close();
        result
    }

    async fn aggregate(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        // Room for the one slice each policy sends before the loop below runs.
        let (update_tx, mut update_rx) =
            mpsc::channel::<PolicyUpdate>(self.policies.len() + 16);
        // Dropped on return, which aborts the store watches.
        let mut watches = JoinSet::new();

        for policy in &self.policies {
            let Some(schema) = policy.schema() else {
                let _ = update_tx
                    .send(PolicyUpdate {
                        policy: Arc::clone(policy),
                        instances: None,
                    })
                    .await;
                continue;
            };

            let static_instances = {
                let dir = self.static_dir.clone();
                let name = policy.name().clone();
                let schema = schema.clone();
                let loaded = tokio::task::spawn_blocking(move || {
                    static_config::load_instances_at(&dir, &name, &schema)
                })
                .await
                .map_err(|err| DaemonError::Join {
                    task: "static config",
                    message: err.to_string(),
                })?;
                match loaded {
                    Ok(instances) => instances,
                    Err(err) => {
                        tracing::error!(
                            policy = %policy,
                            error = %err,
                            "cannot read static configs, continuing without them",
                        );
                        Instances::new()
                    }
                }
            };
            tracing::info!(
                policy = %policy,
                instances = static_instances.len(),
                "loaded static configs",
            );

            let _ = update_tx
                .send(PolicyUpdate {
                    policy: Arc::clone(policy),
                    instances: Some(static_instances.clone()),
                })
                .await;

            if let ConfigSource::Store(prefix) = policy.config_source() {
                watches.spawn(watch_store(
                    Arc::clone(policy),
                    prefix.to_string(),
                    static_instances,
                    Arc::clone(&self.store),
                    self.retry_delay,
                    update_tx.clone(),
                ));
            }
        }
        drop(update_tx);

        let mut state = BTreeMap::new();
        let mut sources_open = true;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                update = update_rx.recv(), if sources_open => {
                    // Static-only sources finish early; keep the last snapshot
                    // published until shutdown.
                    let Some(update) = update else {
                        sources_open = false;
                        continue;
                    };
                    let name = update.policy.name().clone();
                    tracing::debug!(
                        policy = %name,
                        instances = update.instances.as_ref().map(|i| i.len()),
                        "policy configs changed",
                    );
                    state.insert(
                        name,
                        PolicyConfigs {
                            policy: update.policy,
                            instances: update.instances,
                        },
                    );
                    let snapshot = ConfigState { policies: state.clone() };
                    let instances = snapshot.len();
                    match self.observable.update(snapshot) {
                        Ok(version) => tracing::debug!(version, instances, "published configs"),
                        Err(_) => break,
                    }
                }
            }
        }

        watches.shutdown().await;
        Ok(())
    }
}

/// Follow one policy's store prefix forever, reconnecting after failures.
async fn watch_store(
    policy: Arc<Policy>,
    prefix: String,
    static_instances: Instances,
    store: Arc<dyn KvStore>,
    retry_delay: Duration,
    update_tx: mpsc::Sender<PolicyUpdate>,
) {
    loop {
        match store.watch(&prefix).await {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(nodes) => {
                            let instances =
                                merge_instances(&policy, &prefix, &static_instances, &nodes);
                            let update = PolicyUpdate {
                                policy: Arc::clone(&policy),
                                instances: Some(instances),
                            };
                            if update_tx.send(update).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(policy = %policy, prefix = %prefix, error = %err, "config watch failed");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(policy = %policy, prefix = %prefix, error = %err, "cannot watch configs");
            }
        }
        if update_tx.is_closed() {
            return;
        }
        tokio::time::sleep(retry_delay).await;
    }
}

/// `static ∪ store`; a store document replaces a static one of the same name.
fn merge_instances(
    policy: &Policy,
    prefix: &str,
    static_instances: &Instances,
    nodes: &NodeMap,
) -> Instances {
    let mut instances = static_instances.clone();
    let Some(schema) = policy.schema() else {
        return instances;
    };
    for (path, raw) in nodes {
        let Some(name) = path.strip_prefix(prefix) else {
            continue;
        };
        if name.is_empty() || name.contains('/') {
            tracing::debug!(policy = %policy, node = %path, "ignoring nested config node");
            continue;
        }
        let name = InstanceName::from(name);
        match schema.parse_str(&name, raw) {
            Ok(config) => {
                if static_instances.contains_key(&name) {
                    tracing::warn!(
                        policy = %policy,
                        instance = %name,
                        "store config overrides static config",
                    );
                }
                instances.insert(name, Arc::new(config));
            }
            Err(err) => {
                tracing::error!(policy = %policy, node = %path, error = %err, "skipping invalid config");
            }
        }
    }
    instances
}
