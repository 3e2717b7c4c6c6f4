//! Static policy configuration directory.
//!
//! # Storage layout
//!
//! ```text
//! <static_dir>/
//!   <policy_name>/
//!     <instance_name>.yaml   (or .yml / .json — one document per instance)
//! ```
//!
//! Documents are read once at startup. A document that fails to parse or
//! validate is logged and skipped; the remaining instances still load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::config::{Config, ConfigSchema};
use crate::error::{io_err, ConfigValidationError, StaticConfigError};
use crate::types::{InstanceName, PolicyName};

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// `<static_dir>/<policy>/` — pure, no I/O.
pub fn policy_dir_at(static_dir: &Path, policy: &PolicyName) -> PathBuf {
    static_dir.join(&policy.0)
}

/// Load every valid instance document for `policy`.
///
/// A missing policy directory yields no instances. Results are keyed by
/// instance name (the file stem).
pub fn load_instances_at(
    static_dir: &Path,
    policy: &PolicyName,
    schema: &ConfigSchema,
) -> Result<BTreeMap<InstanceName, Arc<Config>>, StaticConfigError> {
    let mut instances = BTreeMap::new();
    for result in read_instances_at(static_dir, policy, schema)? {
        match result {
            Ok(config) => {
                tracing::debug!(policy = %policy, instance = %config.name(), "loaded static config");
                instances.insert(config.name().clone(), Arc::new(config));
            }
            Err((path, err)) => {
                tracing::error!(
                    policy = %policy,
                    path = %path.display(),
                    error = %err,
                    "skipping invalid static config",
                );
            }
        }
    }
    Ok(instances)
}

/// Per-document load outcome, in file-name order.
pub type InstanceResult = Result<Config, (PathBuf, ConfigValidationError)>;

/// Parse and validate every document for `policy`, keeping failures.
///
/// An unreadable document is that entry's failure; only a directory that
/// cannot be listed is an error.
///
/// Used by [`load_instances_at`] and by tooling that reports invalid files.
pub fn read_instances_at(
    static_dir: &Path,
    policy: &PolicyName,
    schema: &ConfigSchema,
) -> Result<Vec<InstanceResult>, StaticConfigError> {
    let dir = policy_dir_at(static_dir, policy);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut results = Vec::new();
    for entry in entries {
        let path = entry.path();
        let Some(name) = instance_name(&path) else {
            continue;
        };
        let parsed = match std::fs::read_to_string(&path) {
            Ok(contents) => parse_document(&name, &contents, schema),
            Err(err) => Err(ConfigValidationError::Malformed {
                instance: name,
                message: err.to_string(),
            }),
        };
        results.push(parsed.map_err(|err| (path, err)));
    }
    Ok(results)
}

/// Names of the policy subdirectories present under `static_dir`.
pub fn list_policy_dirs_at(static_dir: &Path) -> Result<Vec<PolicyName>, StaticConfigError> {
    if !static_dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<PolicyName> = std::fs::read_dir(static_dir)
        .map_err(|e| io_err(static_dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| PolicyName::from(e.file_name().to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

fn instance_name(path: &Path) -> Option<InstanceName> {
    let ext = path.extension()?.to_str()?;
    if !EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(InstanceName::from(stem))
}

fn parse_document(
    name: &InstanceName,
    contents: &str,
    schema: &ConfigSchema,
) -> Result<Config, ConfigValidationError> {
    // YAML is a superset of JSON, so one parser covers every extension.
    let document: Value =
        serde_yaml::from_str(contents).map_err(|err| ConfigValidationError::Malformed {
            instance: name.clone(),
            message: err.to_string(),
        })?;
    schema.parse(name, &document)
}
