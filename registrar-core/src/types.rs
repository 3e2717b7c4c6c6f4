//! Domain types shared across the registrar crates.
//!
//! Snapshots are immutable: a [`Container`] exposes getters only, and a
//! [`ContainerState`] is rebuilt wholesale by the watcher on every change.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Desired or mirrored store content: node path → raw string value.
pub type NodeMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Container runtime identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a registered policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyName(pub String);

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PolicyName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PolicyName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of one configured instance of a policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceName(pub String);

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstanceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Immutable snapshot of one container, captured from its inspect document.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    id: ContainerId,
    name: String,
    hostname: String,
    attributes: Value,
}

impl Container {
    /// Build a snapshot from the runtime's inspect document.
    ///
    /// `Name` is reported by the runtime as `/name`; only the last segment is
    /// kept. A missing hostname is left empty.
    pub fn from_inspect(id: ContainerId, attributes: Value) -> Self {
        let name = attributes
            .get("Name")
            .and_then(Value::as_str)
            .and_then(|name| name.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| id.0.clone());
        let hostname = attributes
            .pointer("/Config/Hostname")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        Self {
            id,
            name,
            hostname,
            attributes,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The raw inspect document.
    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    /// `NetworkSettings.Networks`, keyed by network name.
    pub fn networks(&self) -> Option<&Map<String, Value>> {
        self.lookup(&["NetworkSettings", "Networks"])
            .and_then(Value::as_object)
    }

    /// IP address on the named network. Stopped containers report an empty
    /// address, which is returned as `None`.
    pub fn network_address(&self, network: &str) -> Option<&str> {
        self.networks()?
            .get(network)?
            .get("IPAddress")?
            .as_str()
            .filter(|ip| !ip.is_empty())
    }

    /// Walk nested object keys of the inspect document.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.attributes, |value, key| value.get(*key))
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// ContainerState
// ---------------------------------------------------------------------------

/// Complete snapshot of every known container, ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerState {
    containers: BTreeMap<ContainerId, Arc<Container>>,
}

impl ContainerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn get(&self, id: &ContainerId) -> Option<&Arc<Container>> {
        self.containers.get(id)
    }

    pub fn contains(&self, id: &ContainerId) -> bool {
        self.containers.contains_key(id)
    }

    /// Containers in id order.
    pub fn containers(&self) -> impl Iterator<Item = &Arc<Container>> {
        self.containers.values()
    }
}

impl From<BTreeMap<ContainerId, Arc<Container>>> for ContainerState {
    fn from(containers: BTreeMap<ContainerId, Arc<Container>>) -> Self {
        Self { containers }
    }
}

impl FromIterator<Container> for ContainerState {
    fn from_iter<I: IntoIterator<Item = Container>>(iter: I) -> Self {
        let containers = iter
            .into_iter()
            .map(|container| (container.id().clone(), Arc::new(container)))
            .collect();
        Self { containers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inspect() -> Value {
        json!({
            "Id": "abc123",
            "Name": "/web-1",
            "Config": { "Hostname": "web-1.local" },
            "NetworkSettings": {
                "IPAddress": "172.17.0.2",
                "Networks": {
                    "bridge": { "IPAddress": "172.17.0.2" },
                    "stopped": { "IPAddress": "" }
                }
            }
        })
    }

    #[test]
    fn from_inspect_strips_leading_slash_from_name() {
        let container = Container::from_inspect(ContainerId::from("abc123"), inspect());
        assert_eq!(container.name(), "web-1");
        assert_eq!(container.hostname(), "web-1.local");
        assert_eq!(container.to_string(), "web-1");
    }

    #[test]
    fn missing_name_falls_back_to_id() {
        let container = Container::from_inspect(ContainerId::from("abc123"), json!({}));
        assert_eq!(container.name(), "abc123");
        assert_eq!(container.hostname(), "");
    }

    #[test]
    fn network_address_ignores_empty_addresses() {
        let container = Container::from_inspect(ContainerId::from("abc123"), inspect());
        assert_eq!(container.network_address("bridge"), Some("172.17.0.2"));
        assert_eq!(container.network_address("stopped"), None);
        assert_eq!(container.network_address("missing"), None);
        assert_eq!(container.networks().map(|n| n.len()), Some(2));
    }

    #[test]
    fn lookup_walks_nested_keys() {
        let container = Container::from_inspect(ContainerId::from("abc123"), inspect());
        assert_eq!(
            container.lookup(&["NetworkSettings", "IPAddress"]),
            Some(&json!("172.17.0.2"))
        );
        assert_eq!(container.lookup(&["NetworkSettings", "Nope", "X"]), None);
        assert_eq!(container.lookup(&[]), Some(container.attributes()));
    }

    #[test]
    fn state_iterates_in_id_order() {
        let state: ContainerState = ["c", "a", "b"]
            .into_iter()
            .map(|id| Container::from_inspect(ContainerId::from(id), json!({})))
            .collect();
        let ids: Vec<_> = state.containers().map(|c| c.id().0.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(state.len(), 3);
        assert!(state.contains(&ContainerId::from("b")));
    }
}
