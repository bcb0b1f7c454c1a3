//! Shared fixtures for integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use trustsync::audit::{AuditLedger, AuditRecord, EventType};
use trustsync::error::RemoteError;
use trustsync::keys::{Key, KeyRegistry};
use trustsync::reconcile::ReconciliationEngine;
use trustsync::remote::{ReconciliationSnapshot, RemoteAuthority, RotationResponse};
use trustsync::rotation::{pair_lock, RotationCoordinator};
use trustsync::store::{CacheStore, MemoryCacheStore};

/// Remote authority that replays queued responses.
pub struct ScriptedAuthority {
    rotations: Mutex<VecDeque<Result<RotationResponse, RemoteError>>>,
    snapshots: Mutex<VecDeque<Result<ReconciliationSnapshot, RemoteError>>>,
    delay: Option<Duration>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self {
            rotations: Mutex::new(VecDeque::new()),
            snapshots: Mutex::new(VecDeque::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_rotation(&self, response: Result<RotationResponse, RemoteError>) {
        self.rotations.lock().unwrap().push_back(response);
    }

    pub fn push_snapshot(&self, snapshot: Result<ReconciliationSnapshot, RemoteError>) {
        self.snapshots.lock().unwrap().push_back(snapshot);
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedAuthority {
    async fn request_rotation(
        &self,
        _current_key_id: Option<&str>,
        _reason: &str,
    ) -> Result<RotationResponse, RemoteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.rotations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::Transport("no scripted response".to_string())))
    }

    async fn fetch_snapshot(&self) -> Result<ReconciliationSnapshot, RemoteError> {
        self.snapshots
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::Transport("no scripted snapshot".to_string())))
    }
}

/// Everything a scenario needs, wired the way the service binary does
/// it.
pub struct TestCore {
    pub registry: KeyRegistry,
    pub ledger: AuditLedger,
    pub coordinator: RotationCoordinator,
    pub engine: ReconciliationEngine,
    pub store: Arc<dyn CacheStore>,
}

pub fn build_core(authority: Arc<ScriptedAuthority>, initial_keys: Vec<Key>) -> TestCore {
    let registry = KeyRegistry::from_keys(initial_keys).unwrap();
    let ledger = AuditLedger::new();
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let lock = pair_lock();

    let engine = ReconciliationEngine::new(
        registry.clone(),
        ledger.clone(),
        authority.clone(),
        Arc::clone(&store),
        Arc::clone(&lock),
        Duration::from_secs(1),
    );
    let coordinator = RotationCoordinator::new(
        registry.clone(),
        ledger.clone(),
        authority,
        Arc::clone(&store),
        engine.clone(),
        lock,
        "securecypher-01".to_string(),
        Duration::from_millis(500),
    );

    TestCore {
        registry,
        ledger,
        coordinator,
        engine,
        store,
    }
}

pub fn make_key(version: u64, active: bool) -> Key {
    Key {
        key_id: format!("key_{}", version),
        public_material: format!("MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8A{:032}", version),
        algorithm: "RSA-OAEP".to_string(),
        version,
        active,
        created_at: Utc::now(),
        rotated_at: None,
    }
}

/// Build `count` records chained from `anchor`, ids starting at
/// `first_id`.
pub fn make_chain(first_id: u64, count: u64, anchor: &str) -> Vec<AuditRecord> {
    let mut records = Vec::new();
    let mut prev = anchor.to_string();

    for id in first_id..first_id + count {
        let mut details = HashMap::new();
        details.insert("status".to_string(), "success".to_string());

        let record = AuditRecord::new(
            id,
            format!("tx_{}", id),
            EventType::Verify,
            "authority".to_string(),
            details,
            Utc::now(),
            prev.clone(),
        );
        prev = record.record_hash.clone();
        records.push(record);
    }

    records
}
