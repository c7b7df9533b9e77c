//! Deployment settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::context::CallContext;
use crate::logging::Logger;
use crate::state::StateStore;

/// Default timeout for provider requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default deadman timeout.
pub const DEFAULT_DEADMAN_TIMEOUT_HOURS: u32 = 4;

/// Environment variable overriding the state file path.
pub const ENV_STATE_PATH: &str = "GPU_DEPLOY_STATE_PATH";

/// Environment variable overriding the request timeout.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "GPU_DEPLOY_REQUEST_TIMEOUT_SECS";

/// Environment variable overriding the deadman timeout.
pub const ENV_DEADMAN_HOURS: &str = "GPU_DEPLOY_DEADMAN_HOURS";

/// Deployment settings, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Where the deployment record is kept.
    pub state_path: PathBuf,
    /// Deadline applied to each provider call.
    pub request_timeout_secs: u64,
    /// Hours without a heartbeat before the watchdog tears down.
    pub deadman_timeout_hours: u32,
    /// Currency costs are tracked in.
    pub currency: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(".gpu-deploy/state.json"),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            deadman_timeout_hours: DEFAULT_DEADMAN_TIMEOUT_HOURS,
            currency: "USD".to_string(),
        }
    }
}

impl DeployConfig {
    /// Parse settings from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse deploy config")
    }

    /// Load settings from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    /// Returns an error if a numeric override does not parse.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`.
    ///
    /// # Errors
    /// Returns an error if a numeric override does not parse.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_STATE_PATH).filter(|v| !v.trim().is_empty()) {
            self.state_path = PathBuf::from(path.trim());
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_REQUEST_TIMEOUT_SECS}: {secs}"))?;
        }
        if let Some(hours) = lookup(ENV_DEADMAN_HOURS) {
            self.deadman_timeout_hours = hours
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_DEADMAN_HOURS}: {hours}"))?;
        }
        Ok(self)
    }

    /// Per-call request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// A fresh context bounded by the request timeout.
    #[must_use]
    pub fn call_context(&self) -> CallContext {
        CallContext::with_timeout(self.request_timeout())
    }

    /// The state store at `state_path`.
    #[must_use]
    pub fn state_store(&self, logger: Arc<dyn Logger>) -> StateStore {
        StateStore::new(self.state_path.clone(), logger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DeployConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.deadman_timeout_hours, 4);
        assert_eq!(config.currency, "USD");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DeployConfig::from_toml_str(
            r#"
            state_path = "/var/lib/gpu/state.json"
            deadman_timeout_hours = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.state_path, PathBuf::from("/var/lib/gpu/state.json"));
        assert_eq!(config.deadman_timeout_hours, 12);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_malformed_toml() {
        assert!(DeployConfig::from_toml_str("deadman_timeout_hours = \"soon\"").is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_STATE_PATH, " /tmp/state.json "),
            (ENV_REQUEST_TIMEOUT_SECS, "5"),
        ]);
        let config = DeployConfig::default()
            .with_overrides(|k| env.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.state_path, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.deadman_timeout_hours, DEFAULT_DEADMAN_TIMEOUT_HOURS);
    }

    #[test]
    fn test_bad_override() {
        let result =
            DeployConfig::default().with_overrides(|k| (k == ENV_DEADMAN_HOURS).then(|| "x".into()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(&path, "currency = \"EUR\"\n").unwrap();
        let config = DeployConfig::load(&path).unwrap();
        assert_eq!(config.currency, "EUR");
        assert!(DeployConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
