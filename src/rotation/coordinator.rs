//! Rotation Coordinator
//!
//! Single-flight state machine driving key rotations against the
//! remote authority. At most one rotation is in flight per registry,
//! and the commit applies the key install and the KEY_ROTATED audit
//! record as one unit or not at all.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditLedger, AuditRecord};
use crate::error::{LedgerError, RegistryError, RotationError};
use crate::keys::{InstallOutcome, Key, KeyRegistry};
use crate::reconcile::ReconciliationEngine;
use crate::remote::RemoteAuthority;
use crate::rotation::PairLock;
use crate::store::{self, CacheStore};

/// Coordinator phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    Idle,
    Requesting,
    Committing,
    Failed,
}

impl RotationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationState::Idle => "idle",
            RotationState::Requesting => "requesting",
            RotationState::Committing => "committing",
            RotationState::Failed => "failed",
        }
    }
}

/// One rotation attempt. Owned by the coordinator while in flight;
/// discarded if the request fails before any server-side commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    pub rotation_id: String,
    pub old_key_id: Option<String>,
    pub new_key_id: Option<String>,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status projection for the console.
#[derive(Debug, Clone, Serialize)]
pub struct RotationStatus {
    pub state: RotationState,
    pub last_completed: Option<RotationEvent>,
    pub active_key_version: Option<u64>,
}

#[derive(Clone)]
pub struct RotationCoordinator {
    registry: KeyRegistry,
    ledger: AuditLedger,
    remote: Arc<dyn RemoteAuthority>,
    store: Arc<dyn CacheStore>,
    engine: ReconciliationEngine,
    pair_lock: PairLock,
    state: Arc<StdMutex<RotationState>>,
    last_completed: Arc<StdMutex<Option<RotationEvent>>>,
    server_id: String,
    request_timeout: Duration,
}

/// Resets the coordinator to Idle when the flight ends, however it
/// ends. Moved into the commit task so a cancelled caller cannot leave
/// the machine stuck in Requesting or Committing.
struct FlightGuard {
    state: Arc<StdMutex<RotationState>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = RotationState::Idle;
    }
}

impl RotationCoordinator {
    pub fn new(
        registry: KeyRegistry,
        ledger: AuditLedger,
        remote: Arc<dyn RemoteAuthority>,
        store: Arc<dyn CacheStore>,
        engine: ReconciliationEngine,
        pair_lock: PairLock,
        server_id: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            remote,
            store,
            engine,
            pair_lock,
            state: Arc::new(StdMutex::new(RotationState::Idle)),
            last_completed: Arc::new(StdMutex::new(None)),
            server_id,
            request_timeout,
        }
    }

    /// Drive one rotation end to end.
    ///
    /// Fails immediately with `AlreadyRotating` while another rotation
    /// is in Requesting or Committing; callers may retry later, there
    /// is no queue.
    pub async fn rotate(&self, reason: &str) -> Result<Key, RotationError> {
        self.enter_requesting()?;
        let _flight = FlightGuard {
            state: Arc::clone(&self.state),
        };

        let current = self.registry.active_key().await;
        let current_id = current.as_ref().map(|k| k.key_id.clone());
        let current_version = current.as_ref().map(|k| k.version).unwrap_or(0);

        let event = RotationEvent {
            rotation_id: Uuid::new_v4().to_string(),
            old_key_id: current_id.clone(),
            new_key_id: None,
            reason: reason.to_string(),
            requested_at: Utc::now(),
            completed_at: None,
        };
        info!(rotation_id = %event.rotation_id, reason, "requesting key rotation");

        let request = self.remote.request_rotation(current_id.as_deref(), reason);
        let response = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                self.set_state(RotationState::Failed);
                warn!(rotation_id = %event.rotation_id, "rotation request failed: {}", err);
                return Err(RotationError::Unreachable(err.to_string()));
            }
            Err(_) => {
                self.set_state(RotationState::Failed);
                warn!(rotation_id = %event.rotation_id, "rotation request timed out");
                return Err(RotationError::Unreachable(
                    "rotation request timed out".to_string(),
                ));
            }
        };

        match response.new_key {
            Some(new_key) => {
                self.set_state(RotationState::Committing);

                // The commit runs in its own task: once entered it runs
                // to completion even if the caller is cancelled, and
                // the guard travels with it.
                let registry = self.registry.clone();
                let ledger = self.ledger.clone();
                let cache = Arc::clone(&self.store);
                let pair_lock = Arc::clone(&self.pair_lock);
                let last_completed = Arc::clone(&self.last_completed);
                let server_id = self.server_id.clone();
                let audit_tail = response.audit_tail;
                let commit_event = event.clone();
                let guard = _flight;

                let handle = tokio::spawn(async move {
                    let result = commit_rotation(
                        &registry,
                        &ledger,
                        cache.as_ref(),
                        &pair_lock,
                        &server_id,
                        new_key,
                        audit_tail,
                        &commit_event,
                    )
                    .await;

                    if let Ok(key) = &result {
                        let mut completed = commit_event.clone();
                        completed.new_key_id = Some(key.key_id.clone());
                        completed.completed_at = Some(Utc::now());
                        *last_completed
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(completed);
                    }

                    drop(guard);
                    result
                });

                match handle.await {
                    Ok(result) => result,
                    Err(err) => Err(RotationError::PartialCommit(format!(
                        "commit task aborted: {}",
                        err
                    ))),
                }
            }
            None => {
                // The authority acknowledged without new-state data.
                // Reconcile instead of guessing whether the remote side
                // actually rotated. This is Committing work, so it runs
                // in its own task like the commit itself.
                self.set_state(RotationState::Committing);
                info!(
                    rotation_id = %event.rotation_id,
                    "rotation response carried no key; reconciling"
                );

                let engine = self.engine.clone();
                let guard = _flight;
                let merge = tokio::spawn(async move {
                    let result = engine.fetch_and_merge().await;
                    drop(guard);
                    result
                });

                let merge_result = match merge.await {
                    Ok(result) => result,
                    Err(err) => {
                        return Err(RotationError::UnconfirmedResult(format!(
                            "reconciliation task aborted: {}",
                            err
                        )))
                    }
                };

                match merge_result {
                    Ok(_) => {
                        let active = self.registry.active_key().await.ok_or_else(|| {
                            RotationError::UnconfirmedResult(
                                "no active key after reconciliation".to_string(),
                            )
                        })?;
                        if active.version <= current_version {
                            return Err(RotationError::UnconfirmedResult(
                                "remote state shows no new key".to_string(),
                            ));
                        }

                        let mut completed = event;
                        completed.new_key_id = Some(active.key_id.clone());
                        completed.completed_at = Some(Utc::now());
                        *self
                            .last_completed
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(completed);

                        Ok(active)
                    }
                    Err(err) => {
                        warn!("post-rotation reconciliation failed: {}", err);
                        Err(RotationError::UnconfirmedResult(err.to_string()))
                    }
                }
            }
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> RotationState {
        *self.lock_state()
    }

    /// Status projection for the console.
    pub async fn status(&self) -> RotationStatus {
        let active_key_version = self.registry.active_key().await.map(|k| k.version);
        let last_completed = self
            .last_completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        RotationStatus {
            state: self.state(),
            last_completed,
            active_key_version,
        }
    }

    fn enter_requesting(&self) -> Result<(), RotationError> {
        let mut state = self.lock_state();
        match *state {
            RotationState::Requesting | RotationState::Committing => {
                Err(RotationError::AlreadyRotating)
            }
            _ => {
                *state = RotationState::Requesting;
                Ok(())
            }
        }
    }

    fn set_state(&self, next: RotationState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> MutexGuard<'_, RotationState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Atomic commit of a rotation result across the registry and the
/// ledger, under the shared pair lock.
async fn commit_rotation(
    registry: &KeyRegistry,
    ledger: &AuditLedger,
    cache: &dyn CacheStore,
    pair_lock: &PairLock,
    server_id: &str,
    new_key: Key,
    audit_tail: Vec<AuditRecord>,
    event: &RotationEvent,
) -> Result<Key, RotationError> {
    let _pair = pair_lock.lock().await;

    let backup = registry.snapshot().await;
    let rotated_at = Utc::now();

    let outcome = registry
        .install_rotated_key(new_key.clone(), rotated_at)
        .await
        .map_err(|err| match err {
            RegistryError::VersionConflict { expected, found } => {
                RotationError::VersionConflict { expected, found }
            }
            other => RotationError::PartialCommit(other.to_string()),
        })?;

    if outcome == InstallOutcome::Installed {
        let mut details = HashMap::new();
        details.insert("rotation_id".to_string(), event.rotation_id.clone());
        if let Some(old_key_id) = &event.old_key_id {
            details.insert("old_key_id".to_string(), old_key_id.clone());
        }
        details.insert("new_key_id".to_string(), new_key.key_id.clone());
        details.insert("new_version".to_string(), new_key.version.to_string());
        details.insert("reason".to_string(), event.reason.clone());

        // The authority's tail (if any) and the KEY_ROTATED record land
        // in one ledger critical section; plain appenders cannot
        // interleave with the commit step.
        let had_tail = !audit_tail.is_empty();
        if let Err(err) = ledger
            .append_rotation(audit_tail, server_id, details, rotated_at)
            .await
        {
            registry.restore(backup).await;
            error!("rotation audit commit failed, registry restored: {}", err);
            return Err(
                if had_tail && matches!(&err, LedgerError::IntegrityViolation { .. }) {
                    // The response tail does not extend our chain; the
                    // remote may have rotated but we could not confirm
                    // it locally, and nothing was mutated.
                    RotationError::UnconfirmedResult(format!(
                        "rotation audit tail does not extend the local chain: {}",
                        err
                    ))
                } else {
                    RotationError::PartialCommit(err.to_string())
                },
            );
        }
    }

    if let Err(err) = store::persist_state(cache, registry, ledger).await {
        // The in-memory pair is committed and mutually consistent;
        // only durability failed. The ledger is append-only, so the
        // next successful persist writes both blobs.
        error!("cache persist failed after rotation commit: {}", err);
        return Err(RotationError::PartialCommit(err.to_string()));
    }

    let mut installed = new_key;
    installed.active = true;
    installed.rotated_at = None;
    info!(
        key_id = %installed.key_id,
        version = installed.version,
        "key rotation committed"
    );
    Ok(installed)
}
