//! Key Registry
//!
//! Tracks the known cryptographic keys for a deployment. At most one
//! key is active at any committed state, and versions rise by exactly
//! one across successive rotations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::RegistryError;

/// A cryptographic key as tracked by the admin console. The actual
/// private material lives with the remote signing service; only the
/// public half is cached here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub key_id: String,
    pub public_material: String,
    pub algorithm: String,
    pub version: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

/// Outcome of installing a rotation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// The offered key is already the active one (a retried commit).
    AlreadyCurrent,
}

/// Owner of the key set and sole writer of the `active` flag.
#[derive(Clone)]
pub struct KeyRegistry {
    keys: Arc<RwLock<Vec<Key>>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Rebuild a registry from cached keys, enforcing the single-active
    /// invariant up front.
    pub fn from_keys(keys: Vec<Key>) -> Result<Self, RegistryError> {
        Self::validate_keys(&keys)?;
        Ok(Self {
            keys: Arc::new(RwLock::new(keys)),
        })
    }

    pub(crate) fn validate_keys(keys: &[Key]) -> Result<(), RegistryError> {
        let active = keys.iter().filter(|k| k.active).count();
        if active > 1 {
            return Err(RegistryError::InvariantViolation(format!(
                "{} active keys in one registry",
                active
            )));
        }

        for (i, key) in keys.iter().enumerate() {
            if keys[..i].iter().any(|other| other.version == key.version) {
                return Err(RegistryError::InvariantViolation(format!(
                    "duplicate key version v{}",
                    key.version
                )));
            }
        }

        if let Some(active_key) = keys.iter().find(|k| k.active) {
            if keys.iter().any(|k| k.version > active_key.version) {
                return Err(RegistryError::InvariantViolation(
                    "a retired key outranks the active key".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The key with `active = true`, if any.
    pub async fn active_key(&self) -> Option<Key> {
        self.keys.read().await.iter().find(|k| k.active).cloned()
    }

    /// Highest version in the registry, 0 when empty.
    pub async fn max_version(&self) -> u64 {
        self.keys
            .read()
            .await
            .iter()
            .map(|k| k.version)
            .max()
            .unwrap_or(0)
    }

    /// Retire the current active key and install the rotation result.
    ///
    /// Rejects any key whose version is not exactly one past the
    /// current active key, which keeps stale or out-of-order rotation
    /// responses from ever landing. Re-offering the already-installed
    /// key is a no-op so a retried commit stays safe.
    pub async fn install_rotated_key(
        &self,
        new_key: Key,
        rotated_at: DateTime<Utc>,
    ) -> Result<InstallOutcome, RegistryError> {
        let mut keys = self.keys.write().await;

        if let Some(active_idx) = keys.iter().position(|k| k.active) {
            let active = &keys[active_idx];
            if active.key_id == new_key.key_id && active.version == new_key.version {
                return Ok(InstallOutcome::AlreadyCurrent);
            }

            let expected = active.version + 1;
            if new_key.version != expected {
                return Err(RegistryError::VersionConflict {
                    expected,
                    found: new_key.version,
                });
            }

            keys[active_idx].active = false;
            keys[active_idx].rotated_at = Some(rotated_at);
        } else if !keys.is_empty() {
            let expected = keys.iter().map(|k| k.version).max().unwrap_or(0) + 1;
            if new_key.version != expected {
                return Err(RegistryError::VersionConflict {
                    expected,
                    found: new_key.version,
                });
            }
        }

        let mut installed = new_key;
        installed.active = true;
        installed.rotated_at = None;
        info!(
            key_id = %installed.key_id,
            version = installed.version,
            "installed rotated key"
        );
        keys.push(installed);

        Ok(InstallOutcome::Installed)
    }

    /// All keys, active first, then newest version first.
    pub async fn all_keys(&self) -> Vec<Key> {
        let mut keys = self.keys.read().await.clone();
        keys.sort_by(|a, b| b.active.cmp(&a.active).then(b.version.cmp(&a.version)));
        keys
    }

    /// Raw key set in insertion order, for persistence and rollback.
    pub async fn snapshot(&self) -> Vec<Key> {
        self.keys.read().await.clone()
    }

    pub(crate) async fn restore(&self, keys: Vec<Key>) {
        *self.keys.write().await = keys;
    }

    /// Swap in an authoritative remote key list.
    pub(crate) async fn replace_all(&self, new_keys: Vec<Key>) -> Result<(), RegistryError> {
        Self::validate_keys(&new_keys)?;
        *self.keys.write().await = new_keys;
        Ok(())
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
