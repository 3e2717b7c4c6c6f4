//! Daemon settings, read from a YAML file.
//!
//! ```yaml
//! ttl: 30                      # seconds; null disables leases
//! static_config_dir: /etc/registrar/policies
//! watcher_restart_delay: 1.0   # seconds
//! store_retry_delay: 5.0       # seconds
//! log_json: false
//! policies: [skydns]           # empty runs every builtin policy
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize};

use registrar_policy::{builtin, Policy};

use crate::error::{io_err, DaemonError};

pub const DEFAULT_TTL_SECS: u64 = 30;
pub const DEFAULT_WATCHER_RESTART_DELAY: f64 = 1.0;
pub const DEFAULT_STORE_RETRY_DELAY: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub ttl: Option<u64>,
    pub static_config_dir: PathBuf,
    #[serde(deserialize_with = "positive_secs")]
    pub watcher_restart_delay: f64,
    #[serde(deserialize_with = "positive_secs")]
    pub store_retry_delay: f64,
    pub log_json: bool,
    pub policies: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ttl: Some(DEFAULT_TTL_SECS),
            static_config_dir: PathBuf::from("/etc/registrar/policies"),
            watcher_restart_delay: DEFAULT_WATCHER_RESTART_DELAY,
            store_retry_delay: DEFAULT_STORE_RETRY_DELAY,
            log_json: false,
            policies: Vec::new(),
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load_at(path: &Path) -> Result<Self, DaemonError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::from_yaml(&contents).map_err(|source| DaemonError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl.filter(|secs| *secs > 0).map(Duration::from_secs)
    }

    pub fn watcher_restart_delay(&self) -> Duration {
        secs(self.watcher_restart_delay, DEFAULT_WATCHER_RESTART_DELAY)
    }

    pub fn store_retry_delay(&self) -> Duration {
        secs(self.store_retry_delay, DEFAULT_STORE_RETRY_DELAY)
    }

    /// Builtin policies named in `policies`, or all of them when empty.
    pub fn select_policies(&self) -> Result<Vec<Arc<Policy>>, DaemonError> {
        if self.policies.is_empty() {
            return Ok(builtin::all());
        }
        Ok(builtin::select(&self.policies)?)
    }
}

/// Settings built in code bypass deserialization; anything that would spin a
/// retry loop falls back to the default.
fn secs(value: f64, default: f64) -> Duration {
    checked_secs(value).unwrap_or_else(|| Duration::from_secs_f64(default))
}

fn checked_secs(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|delay| !delay.is_zero())
}

fn positive_secs<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    match checked_secs(value) {
        Some(_) => Ok(value),
        None => Err(de::Error::custom(format!(
            "expected a positive number of seconds, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().expect("dir");
        let settings = Settings::load_at(&dir.path().join("registrar.yaml")).expect("defaults");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = Settings::from_yaml("ttl: null\nstore_retry_delay: 0.25\n").expect("parse");
        assert_eq!(settings.ttl(), None);
        assert_eq!(settings.store_retry_delay(), Duration::from_millis(250));
        assert_eq!(settings.watcher_restart_delay(), Duration::from_secs(1));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().expect("dir");
        let path = dir.path().join("registrar.yaml");
        std::fs::write(&path, "tll: 10\n").expect("write");
        assert!(matches!(
            Settings::load_at(&path),
            Err(DaemonError::Settings { .. })
        ));
    }

    #[test]
    fn policy_selection() {
        let all = Settings::default().select_policies().expect("all");
        assert_eq!(all.len(), builtin::all().len());

        let settings = Settings::from_yaml("policies: [skydns-bridge]").expect("parse");
        let selected = settings.select_policies().expect("known");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name().0, "skydns-bridge");

        let settings = Settings::from_yaml("policies: [consul]").expect("parse");
        assert!(matches!(
            settings.select_policies(),
            Err(DaemonError::Policy(_))
        ));
    }

    #[rstest::rstest]
    #[case("watcher_restart_delay: -1")]
    #[case("watcher_restart_delay: 0")]
    #[case("store_retry_delay: .nan")]
    #[case("store_retry_delay: .inf")]
    fn non_positive_delays_are_rejected(#[case] yaml: &str) {
        let err = Settings::from_yaml(yaml).expect_err("rejected");
        assert!(err.to_string().contains("positive number of seconds"), "got: {err}");
    }

    #[test]
    fn invalid_delays_built_in_code_fall_back_to_defaults() {
        let settings = Settings {
            watcher_restart_delay: -1.0,
            store_retry_delay: f64::NAN,
            ..Settings::default()
        };
        assert_eq!(settings.watcher_restart_delay(), Duration::from_secs(1));
        assert_eq!(settings.store_retry_delay(), Duration::from_secs(5));
    }
}
