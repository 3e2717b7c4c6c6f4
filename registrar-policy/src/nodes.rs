//! Node encoding and per-container merge.

use std::collections::BTreeMap;

use serde_json::Value;

use registrar_core::{ContainerId, NodeMap};

/// Handler output: node path → JSON value, before encoding.
pub type NodeValues = BTreeMap<String, Value>;

/// Normalize handler output to raw store values.
///
/// `null` drops the node, strings are written verbatim, every other JSON
/// value is encoded compactly.
pub fn encode_nodes(values: NodeValues) -> NodeMap {
    values
        .into_iter()
        .filter_map(|(path, value)| match value {
            Value::Null => None,
            Value::String(raw) => Some((path, raw)),
            other => Some((path, other.to_string())),
        })
        .collect()
}

/// Two containers wrote different values to the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub container: ContainerId,
    /// Value held before this container was merged.
    pub previous: String,
    /// Value this container produced.
    pub offered: String,
    /// The lexicographically smaller of the two, which is kept.
    pub kept: String,
}

/// Result of evaluating a policy against a whole container state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub nodes: NodeMap,
    pub conflicts: Vec<Conflict>,
}

impl Evaluation {
    /// Merge one container's nodes.
    ///
    /// Identical values merge silently. Different values keep the smaller
    /// one so the result does not depend on evaluation order; the other value
    /// comes back once the conflicting container goes away.
    pub(crate) fn merge(&mut self, container: &ContainerId, nodes: NodeMap) {
        for (path, offered) in nodes {
            match self.nodes.get_mut(&path) {
                None => {
                    self.nodes.insert(path, offered);
                }
                Some(existing) if *existing == offered => {
                    tracing::debug!(node = %path, container = %container, "merged identical node");
                }
                Some(existing) => {
                    let previous = existing.clone();
                    if offered < *existing {
                        *existing = offered.clone();
                    }
                    tracing::warn!(
                        node = %path,
                        container = %container,
                        previous = %previous,
                        offered = %offered,
                        kept = %existing,
                        "overlapping node from multiple containers",
                    );
                    self.conflicts.push(Conflict {
                        path,
                        container: container.clone(),
                        previous,
                        offered,
                        kept: existing.clone(),
                    });
                }
            }
        }
    }
}
