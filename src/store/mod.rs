//! Cache Store
//!
//! Durable key/value persistence between process restarts, the local
//! storage analogue of the admin console. The registry and the ledger
//! are serialized as two JSON blobs, written inside the same exclusion
//! section as the in-memory commit so persisted state never diverges
//! from memory after a successful commit.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

use async_trait::async_trait;

use crate::audit::AuditLedger;
use crate::error::{LedgerError, StoreError};
use crate::keys::{Key, KeyRegistry};

/// Cache key for the serialized key registry.
pub const REGISTRY_CACHE_KEY: &str = "trustsync/key_registry";
/// Cache key for the serialized audit ledger.
pub const LEDGER_CACHE_KEY: &str = "trustsync/audit_ledger";

/// Generic durable key/value access.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// Persist the (registry, ledger) pair.
pub async fn persist_state(
    store: &dyn CacheStore,
    registry: &KeyRegistry,
    ledger: &AuditLedger,
) -> Result<(), StoreError> {
    let keys = registry.snapshot().await;
    let key_blob = serde_json::to_vec(&keys)?;
    let ledger_blob = ledger
        .to_bytes()
        .await
        .map_err(|err| StoreError::Serialization(err.to_string()))?;

    store.put(REGISTRY_CACHE_KEY, &key_blob).await?;
    store.put(LEDGER_CACHE_KEY, &ledger_blob).await?;
    Ok(())
}

/// Load the persisted pair, or fresh state when the cache is empty.
/// Loading re-verifies the audit chain; corruption is reported, never
/// repaired.
pub async fn load_state(
    store: &dyn CacheStore,
) -> Result<(KeyRegistry, AuditLedger), StoreError> {
    let registry = match store.get(REGISTRY_CACHE_KEY).await? {
        Some(bytes) => {
            let keys: Vec<Key> = serde_json::from_slice(&bytes)?;
            KeyRegistry::from_keys(keys)
                .map_err(|err| StoreError::Corrupt(err.to_string()))?
        }
        None => KeyRegistry::new(),
    };

    let ledger = match store.get(LEDGER_CACHE_KEY).await? {
        Some(bytes) => AuditLedger::from_bytes(&bytes).map_err(|err| match err {
            LedgerError::IntegrityViolation { broken_at_id } => StoreError::Corrupt(format!(
                "audit chain broken at record {}",
                broken_at_id
            )),
            other => StoreError::Serialization(other.to_string()),
        })?,
        None => AuditLedger::new(),
    };

    Ok((registry, ledger))
}
