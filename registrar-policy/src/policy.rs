//! [`Policy`] definitions and the [`PolicyContext`] that evaluates them.
//!
//! A policy pairs an optional [`ConfigSchema`] with a container handler of
//! fixed signature. Handlers are plain functions registered in code; they
//! never see mutable state, and the config they receive is shared
//! `Arc<Config>` with no mutating API, so a concurrent reload cannot change
//! it mid-evaluation.

use std::fmt;
use std::sync::Arc;

use registrar_core::{Config, ConfigSchema, Container, ContainerState, PolicyName};

use crate::error::PolicyError;
use crate::nodes::{encode_nodes, Evaluation, NodeValues};

/// Maps one container (plus the instance config, if the policy has a
/// schema) to the nodes it should publish. `None` publishes nothing.
pub trait ContainerHandler: Send + Sync {
    fn apply(&self, container: &Container, config: Option<&Config>) -> Option<NodeValues>;
}

impl<F> ContainerHandler for F
where
    F: Fn(&Container, Option<&Config>) -> Option<NodeValues> + Send + Sync,
{
    fn apply(&self, container: &Container, config: Option<&Config>) -> Option<NodeValues> {
        self(container, config)
    }
}

/// Where a policy's instance configurations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource<'a> {
    /// No schema: exactly one configurationless instance.
    None,
    /// Schema without a store binding: static documents only.
    Static,
    /// Schema bound to a store prefix (static documents are merged in too).
    Store(&'a str),
}

/// A named, registered policy.
pub struct Policy {
    name: PolicyName,
    schema: Option<ConfigSchema>,
    handler: Box<dyn ContainerHandler>,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

impl Policy {
    pub fn builder<F>(name: impl Into<PolicyName>, handler: F) -> PolicyBuilder
    where
        F: Fn(&Container, Option<&Config>) -> Option<NodeValues> + Send + Sync + 'static,
    {
        PolicyBuilder {
            name: name.into(),
            schema: None,
            handler: Box::new(handler),
        }
    }

    pub fn name(&self) -> &PolicyName {
        &self.name
    }

    pub fn schema(&self) -> Option<&ConfigSchema> {
        self.schema.as_ref()
    }

    pub fn is_configurable(&self) -> bool {
        self.schema.is_some()
    }

    pub fn config_source(&self) -> ConfigSource<'_> {
        match &self.schema {
            None => ConfigSource::None,
            Some(schema) => match schema.store_prefix() {
                Some(prefix) => ConfigSource::Store(prefix),
                None => ConfigSource::Static,
            },
        }
    }

    /// Evaluate one container. Handler output is encoded with
    /// [`encode_nodes`].
    pub fn apply(&self, container: &Container, config: Option<&Config>) -> registrar_core::NodeMap {
        self.handler
            .apply(container, config)
            .map(encode_nodes)
            .unwrap_or_default()
    }
}

/// Builder for [`Policy`].
pub struct PolicyBuilder {
    name: PolicyName,
    schema: Option<ConfigSchema>,
    handler: Box<dyn ContainerHandler>,
}

impl PolicyBuilder {
    /// Declare the config schema; instances are then required.
    pub fn config(mut self, schema: ConfigSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn build(self) -> Policy {
        Policy {
            name: self.name,
            schema: self.schema,
            handler: self.handler,
        }
    }
}

/// A policy bound to one instance config, ready to evaluate.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    policy: Arc<Policy>,
    config: Option<Arc<Config>>,
}

impl PolicyContext {
    /// Bind `config` to `policy`. Configurable policies need a config and
    /// configurationless ones refuse one.
    pub fn new(policy: Arc<Policy>, config: Option<Arc<Config>>) -> Result<Self, PolicyError> {
        match (policy.is_configurable(), config.is_some()) {
            (true, false) => Err(PolicyError::MissingConfig {
                policy: policy.name().clone(),
            }),
            (false, true) => Err(PolicyError::UnexpectedConfig {
                policy: policy.name().clone(),
            }),
            _ => Ok(Self { policy, config }),
        }
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    pub fn config(&self) -> Option<&Arc<Config>> {
        self.config.as_ref()
    }

    pub fn apply(&self, container: &Container) -> registrar_core::NodeMap {
        self.policy.apply(container, self.config.as_deref())
    }

    /// Evaluate every container and merge the results.
    pub fn apply_all(&self, state: &ContainerState) -> Evaluation {
        let mut evaluation = Evaluation::default();
        for container in state.containers() {
            let nodes = self.apply(container);
            tracing::trace!(
                policy = %self.policy,
                container = %container,
                nodes = nodes.len(),
                "applied container",
            );
            evaluation.merge(container.id(), nodes);
        }
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registrar_core::{ContainerId, FieldKind, InstanceName};
    use serde_json::json;

    fn hostname_policy() -> Policy {
        Policy::builder("hosts", |container: &Container, _config: Option<&Config>| {
            let mut nodes = NodeValues::new();
            nodes.insert(
                format!("/hosts/{}", container.hostname()),
                json!({ "id": container.id().0 }),
            );
            Some(nodes)
        })
        .build()
    }

    fn container(id: &str, hostname: &str) -> Container {
        Container::from_inspect(
            ContainerId::from(id),
            json!({ "Name": format!("/{id}"), "Config": { "Hostname": hostname } }),
        )
    }

    #[test]
    fn config_source_follows_schema() {
        assert_eq!(hostname_policy().config_source(), ConfigSource::None);

        let static_only = Policy::builder("s", |_: &Container, _: Option<&Config>| None)
            .config(ConfigSchema::new())
            .build();
        assert_eq!(static_only.config_source(), ConfigSource::Static);

        let stored = Policy::builder("s", |_: &Container, _: Option<&Config>| None)
            .config(ConfigSchema::new().store_path("/cfg/"))
            .build();
        assert_eq!(stored.config_source(), ConfigSource::Store("/cfg/"));
    }

    #[test]
    fn context_requires_matching_config() {
        let configless = Arc::new(hostname_policy());
        let config = Arc::new(
            ConfigSchema::new()
                .parse(&InstanceName::from("x"), &json!({}))
                .expect("valid"),
        );
        assert_eq!(
            PolicyContext::new(configless.clone(), Some(config.clone())).unwrap_err(),
            PolicyError::UnexpectedConfig {
                policy: PolicyName::from("hosts")
            }
        );

        let configurable = Arc::new(
            Policy::builder("c", |_: &Container, _: Option<&Config>| None)
                .config(ConfigSchema::new().field("a", FieldKind::Any))
                .build(),
        );
        assert!(matches!(
            PolicyContext::new(configurable.clone(), None),
            Err(PolicyError::MissingConfig { .. })
        ));
        assert!(PolicyContext::new(configurable, Some(config)).is_ok());
    }

    #[test]
    fn apply_all_produces_one_node_per_container() {
        let context = PolicyContext::new(Arc::new(hostname_policy()), None).expect("context");
        let state: ContainerState = [container("c1", "one"), container("c2", "two")]
            .into_iter()
            .collect();

        let evaluation = context.apply_all(&state);
        assert_eq!(evaluation.nodes.len(), 2);
        assert_eq!(evaluation.nodes["/hosts/one"], r#"{"id":"c1"}"#);
        assert_eq!(evaluation.nodes["/hosts/two"], r#"{"id":"c2"}"#);
        assert!(evaluation.conflicts.is_empty());
    }

    #[test]
    fn handler_returning_none_publishes_nothing() {
        let policy = Policy::builder("none", |_: &Container, _: Option<&Config>| None).build();
        assert!(policy.apply(&container("c1", "one"), None).is_empty());
    }
}
