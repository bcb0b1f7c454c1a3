//! Mock Remote Authority
//!
//! In-process authority for demo mode and tests. Mints next-version
//! keys the way the real signing service would, and serves its own key
//! list back as the authoritative snapshot.

use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;

use crate::audit::GENESIS_HASH;
use crate::error::RemoteError;
use crate::keys::Key;
use crate::remote::{ReconciliationSnapshot, RemoteAuthority, RotationResponse};

#[derive(Default)]
pub struct MockRemoteAuthority {
    keys: Mutex<Vec<Key>>,
}

impl MockRemoteAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the authority with `version` generations already minted,
    /// the newest one active.
    pub fn with_key_history(version: u64) -> Self {
        let authority = Self::new();
        {
            let mut keys = authority
                .keys
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for _ in 0..version {
                Self::mint(&mut keys);
            }
        }
        authority
    }

    fn mint(keys: &mut Vec<Key>) -> Key {
        let version = keys.iter().map(|k| k.version).max().unwrap_or(0) + 1;
        let material = BASE64.encode(rand::random::<[u8; 32]>());

        let key = Key {
            key_id: format!("key_{}", version),
            public_material: format!("MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8A{}", material),
            algorithm: "RSA-OAEP".to_string(),
            version,
            active: true,
            created_at: Utc::now(),
            rotated_at: None,
        };

        for existing in keys.iter_mut().filter(|k| k.active) {
            existing.active = false;
            existing.rotated_at = Some(key.created_at);
        }
        keys.push(key.clone());
        key
    }
}

#[async_trait]
impl RemoteAuthority for MockRemoteAuthority {
    async fn request_rotation(
        &self,
        _current_key_id: Option<&str>,
        _reason: &str,
    ) -> Result<RotationResponse, RemoteError> {
        let mut keys = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let new_key = Self::mint(&mut keys);

        Ok(RotationResponse {
            new_key: Some(new_key),
            audit_tail: Vec::new(),
        })
    }

    async fn fetch_snapshot(&self) -> Result<ReconciliationSnapshot, RemoteError> {
        let keys = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        Ok(ReconciliationSnapshot {
            keys,
            audit_tail: Vec::new(),
            tail_anchor_hash: GENESIS_HASH.to_string(),
        })
    }
}
