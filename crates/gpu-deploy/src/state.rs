//! Deployment state persistence.
//!
//! At most one deployment is tracked. Its record is the only local source of
//! truth for whether money is accruing, so it is always written whole to a
//! temporary file in the same directory, synced, and renamed over the
//! previous record. A crash mid-write leaves either the old or the new
//! record, never a truncated one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::logging::Logger;
use crate::providers::Instance;

/// Errors that can occur while persisting state.
#[derive(Error, Debug)]
pub enum StateError {
    /// Filesystem operation failed.
    #[error("State file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted record could not be parsed.
    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be serialized.
    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StateError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Pricing mode of the tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceType {
    #[serde(rename = "on-demand")]
    OnDemand,
    #[serde(rename = "spot")]
    Spot,
}

/// The rented instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    pub id: String,
    pub provider: String,
    pub gpu: String,
    pub region: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    #[serde(rename = "publicIP", default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(rename = "wireGuardIP", default, skip_serializing_if = "Option::is_none")]
    pub wireguard_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InstanceState {
    /// Snapshot of a freshly created instance.
    #[must_use]
    pub fn from_instance(instance: &Instance) -> Self {
        Self {
            id: instance.id.clone(),
            provider: instance.provider.clone(),
            gpu: instance.gpu.clone(),
            region: instance.region.clone(),
            instance_type: if instance.spot {
                InstanceType::Spot
            } else {
                InstanceType::OnDemand
            },
            public_ip: instance.public_ip.clone(),
            wireguard_ip: None,
            created_at: instance.created_at,
        }
    }
}

/// The model served from the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelState {
    pub name: String,
    pub status: String,
}

/// The tunnel to the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGuardState {
    pub server_public_key: String,
    pub interface_name: String,
}

/// Running cost of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostState {
    pub hourly_rate: Decimal,
    pub accumulated: Decimal,
    pub currency: String,
}

impl CostState {
    /// Zero-cost record for an instance billed at `hourly_rate`.
    pub fn for_instance(hourly_rate: Decimal, currency: impl Into<String>) -> Self {
        Self {
            hourly_rate,
            accumulated: Decimal::ZERO,
            currency: currency.into(),
        }
    }

    /// Recompute `accumulated` for the time between `created_at` and `now`.
    ///
    /// Clock skew that puts `now` before `created_at` yields zero.
    pub fn accrue(&mut self, created_at: DateTime<Utc>, now: DateTime<Utc>) {
        let elapsed_secs = (now - created_at).num_seconds().max(0);
        let hours = Decimal::from(elapsed_secs) / Decimal::from(3600);
        self.accumulated = (self.hourly_rate * hours).round_dp(4);
    }
}

/// Heartbeat record consulted by an external watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadmanState {
    pub timeout_hours: u32,
    pub last_heartbeat: DateTime<Utc>,
}

impl DeadmanState {
    #[must_use]
    pub fn new(timeout_hours: u32, now: DateTime<Utc>) -> Self {
        Self {
            timeout_hours,
            last_heartbeat: now,
        }
    }

    /// Record a heartbeat. Timestamps earlier than the stored one are ignored.
    ///
    /// Returns whether the heartbeat advanced.
    pub fn heartbeat(&mut self, at: DateTime<Utc>) -> bool {
        if at > self.last_heartbeat {
            self.last_heartbeat = at;
            true
        } else {
            false
        }
    }

    /// When the watchdog should tear the deployment down.
    ///
    /// Timeouts past the representable range never expire.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Duration::try_hours(i64::from(self.timeout_hours))
            .and_then(|timeout| self.last_heartbeat.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether no heartbeat arrived within the timeout.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// The single persisted deployment record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire_guard: Option<WireGuardState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadman: Option<DeadmanState>,
}

impl State {
    /// Fresh record for a newly created instance, with a zeroed cost record.
    pub fn for_instance(instance: &Instance, currency: impl Into<String>) -> Self {
        Self {
            instance: Some(InstanceState::from_instance(instance)),
            cost: Some(CostState::for_instance(instance.hourly_rate, currency)),
            ..Self::default()
        }
    }

    /// Whether no sub-record is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instance.is_none()
            && self.model.is_none()
            && self.wire_guard.is_none()
            && self.cost.is_none()
            && self.deadman.is_none()
    }
}

/// File-backed store for the single deployment record.
#[derive(Clone)]
pub struct StateStore {
    path: PathBuf,
    logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("path", &self.path).finish()
    }
}

impl StateStore {
    /// Create a store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>, logger: Arc<dyn Logger>) -> Self {
        Self {
            path: path.into(),
            logger,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the persisted record with `state`.
    ///
    /// # Errors
    /// Returns an error if serialization or any filesystem step fails; the
    /// previous record is left untouched in that case.
    pub async fn save(&self, state: &State) -> Result<(), StateError> {
        let content = serde_json::to_vec_pretty(state)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StateError::io(&dir, e))?;

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "state".into(), |n| n.to_string_lossy().into_owned());
        let temp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        if let Err(e) = write_synced(&temp_path, &content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StateError::io(&temp_path, e));
        }

        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StateError::io(&self.path, e));
        }

        let instance_id = state.instance.as_ref().map_or("-", |i| i.id.as_str());
        self.logger.debug(
            "Saved deployment state",
            &[("path", &self.path.display()), ("instance_id", &instance_id)],
        );
        Ok(())
    }

    /// Load the persisted record. `None` means no active deployment.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<Option<State>, StateError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&self.path, e)),
        };

        let state: State =
            serde_json::from_slice(&content).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(state))
    }

    /// Remove the persisted record. Succeeds if there is none.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub async fn clear(&self) -> Result<(), StateError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                self.logger
                    .info("Cleared deployment state", &[("path", &self.path.display())]);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::io(&self.path, e)),
        }
    }

    /// Load, modify with `f`, and save the record.
    ///
    /// Returns `Ok(None)` without writing if no record exists.
    ///
    /// # Errors
    /// Returns an error if loading or saving fails.
    pub async fn update<F>(&self, f: F) -> Result<Option<State>, StateError>
    where
        F: FnOnce(&mut State),
    {
        let Some(mut state) = self.load().await? else {
            return Ok(None);
        };
        f(&mut state);
        self.save(&state).await?;
        Ok(Some(state))
    }
}

async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}
