//! Reconciliation Engine
//!
//! Merges an authoritative remote snapshot into the local key registry
//! and audit ledger. The local ledger is never rewritten or truncated;
//! snapshots that fork or regress committed state are rejected and a
//! detected fork freezes further automated merges until an operator
//! clears the hold.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::{error, info};

use crate::audit::{chain, AuditLedger, AuditRecord};
use crate::error::{LedgerError, MergeError};
use crate::keys::KeyRegistry;
use crate::remote::{ReconciliationSnapshot, RemoteAuthority};
use crate::rotation::PairLock;
use crate::store::{self, CacheStore};

/// What a successful merge changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeReport {
    pub records_appended: usize,
    pub keys_replaced: bool,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    registry: KeyRegistry,
    ledger: AuditLedger,
    remote: Arc<dyn RemoteAuthority>,
    store: Arc<dyn CacheStore>,
    pair_lock: PairLock,
    fork_hold: Arc<StdMutex<Option<u64>>>,
    fetch_timeout: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        registry: KeyRegistry,
        ledger: AuditLedger,
        remote: Arc<dyn RemoteAuthority>,
        store: Arc<dyn CacheStore>,
        pair_lock: PairLock,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            remote,
            store,
            pair_lock,
            fork_hold: Arc::new(StdMutex::new(None)),
            fetch_timeout,
        }
    }

    /// Fetch a snapshot from the remote authority and merge it.
    pub async fn fetch_and_merge(&self) -> Result<MergeReport, MergeError> {
        let fetch = self.remote.fetch_snapshot();
        let snapshot = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => return Err(MergeError::Unreachable(err.to_string())),
            Err(_) => {
                return Err(MergeError::Unreachable(
                    "snapshot fetch timed out".to_string(),
                ))
            }
        };

        self.merge_snapshot(snapshot).await
    }

    /// Merge a snapshot under the registry/ledger pair lock.
    pub async fn merge_snapshot(
        &self,
        snapshot: ReconciliationSnapshot,
    ) -> Result<MergeReport, MergeError> {
        if let Some(at_id) = self.fork_hold_id() {
            return Err(MergeError::ChainFork { at_id });
        }
        Self::validate_snapshot(&snapshot)?;

        let _pair = self.pair_lock.lock().await;

        // The remote key list is authoritative only if it never
        // regresses a version we already committed; a stale cached
        // response must not be mistaken for newer state.
        let local_max = self.registry.max_version().await;
        let remote_max = snapshot.keys.iter().map(|k| k.version).max().unwrap_or(0);
        if remote_max < local_max {
            return Err(MergeError::Regression {
                local: local_max,
                remote: remote_max,
            });
        }
        for local in self.registry.snapshot().await {
            if let Some(remote) = snapshot.keys.iter().find(|k| k.key_id == local.key_id) {
                if remote.version < local.version {
                    return Err(MergeError::Regression {
                        local: local.version,
                        remote: remote.version,
                    });
                }
            }
        }

        let suffix = self.resolve_tail(&snapshot).await?;
        let records_appended = suffix.len();
        if !suffix.is_empty() {
            self.ledger.extend(suffix).await.map_err(|err| match err {
                LedgerError::Halted => MergeError::LedgerHalted,
                LedgerError::IntegrityViolation { broken_at_id } => MergeError::InvalidSnapshot(
                    format!("remote tail fails verification at record {}", broken_at_id),
                ),
                other => MergeError::InvalidSnapshot(other.to_string()),
            })?;
        }

        let keys_replaced = !snapshot.keys.is_empty();
        if keys_replaced {
            self.registry
                .replace_all(snapshot.keys)
                .await
                .map_err(|err| MergeError::InvalidSnapshot(err.to_string()))?;
        }

        store::persist_state(self.store.as_ref(), &self.registry, &self.ledger).await?;

        info!(records_appended, keys_replaced, "reconciliation merge committed");
        Ok(MergeReport {
            records_appended,
            keys_replaced,
        })
    }

    /// Work out which remote records are genuinely new. Returns the
    /// suffix to append, or the error that rules the snapshot out.
    async fn resolve_tail(
        &self,
        snapshot: &ReconciliationSnapshot,
    ) -> Result<Vec<AuditRecord>, MergeError> {
        let tail = &snapshot.audit_tail;
        if tail.is_empty() {
            return Ok(Vec::new());
        }

        let local_tail = self.ledger.tail_hash().await;
        let anchor = &tail[0].prev_hash;

        // Fast path: the remote tail is a pure extension of our chain.
        if *anchor == local_tail {
            return Ok(tail.clone());
        }

        // The remote tail starts before our tail. Walk the local chain
        // backward for the record it anchors on.
        let local_records = self.ledger.all_records().await;
        let overlap_start = if *anchor == chain::GENESIS_HASH {
            0
        } else {
            match local_records
                .iter()
                .rposition(|r| r.record_hash == *anchor)
            {
                Some(pos) => pos + 1,
                None => return Err(MergeError::Disjoint),
            }
        };

        // The overlapping region must be byte-identical to what we
        // already committed. Committed history is never rewritten.
        let overlap = &local_records[overlap_start..];
        for (local_record, remote_record) in overlap.iter().zip(tail.iter()) {
            if local_record != remote_record {
                let at_id = local_record.id;
                self.set_fork_hold(at_id);
                error!(
                    record_id = at_id,
                    "audit chain fork detected; automated merges frozen"
                );
                return Err(MergeError::ChainFork { at_id });
            }
        }

        if tail.len() <= overlap.len() {
            // Remote is behind or level with us; nothing new.
            return Ok(Vec::new());
        }
        Ok(tail[overlap.len()..].to_vec())
    }

    fn validate_snapshot(snapshot: &ReconciliationSnapshot) -> Result<(), MergeError> {
        KeyRegistry::validate_keys(&snapshot.keys)
            .map_err(|err| MergeError::InvalidSnapshot(err.to_string()))?;

        if let Some(first) = snapshot.audit_tail.first() {
            if first.prev_hash != snapshot.tail_anchor_hash {
                return Err(MergeError::InvalidSnapshot(
                    "audit tail does not start at its declared anchor".to_string(),
                ));
            }
            if let Err(violation) = chain::verify(&snapshot.audit_tail, &snapshot.tail_anchor_hash)
            {
                return Err(MergeError::InvalidSnapshot(format!(
                    "audit tail is internally broken at record {}",
                    violation.record_id
                )));
            }
        }

        Ok(())
    }

    /// Record id at which a fork froze merging, if any.
    pub fn fork_hold_id(&self) -> Option<u64> {
        *self
            .fork_hold
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_fork_hold(&self, at_id: u64) {
        *self
            .fork_hold
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at_id);
    }

    /// Operator acknowledgement that a reported fork was resolved out
    /// of band; merging resumes on the next call.
    pub fn clear_fork_hold(&self) {
        *self
            .fork_hold
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        info!("fork hold cleared");
    }
}
