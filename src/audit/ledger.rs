//! Audit Ledger
//!
//! Append-only, hash-chained log of cryptographic operations. Appends
//! serialize behind an internal lock so two concurrent writers can
//! never link against the same tail.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use crate::audit::chain::{self, GENESIS_HASH};
use crate::audit::record::{AuditRecord, EventType};
use crate::error::LedgerError;

/// Outcome of a chain verification pass.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub ok: bool,
    pub broken_at_id: Option<u64>,
    pub records_checked: usize,
}

struct LedgerState {
    records: Vec<AuditRecord>,
    tail_hash: String,
    next_id: u64,
    halted: bool,
}

/// Append-only audit log with O(1) tail access.
#[derive(Clone)]
pub struct AuditLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                records: Vec::new(),
                tail_hash: GENESIS_HASH.to_string(),
                next_id: 1,
                halted: false,
            })),
        }
    }

    /// Rebuild a ledger from previously committed records, re-verifying
    /// the whole chain. Corruption is reported, never repaired.
    pub fn from_records(records: Vec<AuditRecord>) -> Result<Self, LedgerError> {
        if let Err(violation) = chain::verify(&records, GENESIS_HASH) {
            error!(
                record_id = violation.record_id,
                "audit chain corrupt on load"
            );
            return Err(LedgerError::IntegrityViolation {
                broken_at_id: violation.record_id,
            });
        }

        let tail_hash = records
            .last()
            .map(|r| r.record_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let next_id = records.last().map(|r| r.id + 1).unwrap_or(1);

        Ok(Self {
            state: Arc::new(Mutex::new(LedgerState {
                records,
                tail_hash,
                next_id,
                halted: false,
            })),
        })
    }

    /// Append a new record. The record links against whatever the tail
    /// is at the moment the internal lock is held, so concurrent
    /// appends serialize and the second observes the first's hash.
    pub async fn append(
        &self,
        event_type: EventType,
        actor: &str,
        details: HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> Result<AuditRecord, LedgerError> {
        let mut state = self.state.lock().await;
        if state.halted {
            return Err(LedgerError::Halted);
        }

        Ok(Self::append_locked(
            &mut state, event_type, actor, details, timestamp,
        ))
    }

    /// Extend the chain with records already linked by the remote
    /// authority. The suffix must anchor on the current tail and keep
    /// the id sequence contiguous; anything else is rejected whole.
    pub(crate) async fn extend(&self, suffix: Vec<AuditRecord>) -> Result<usize, LedgerError> {
        if suffix.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        if state.halted {
            return Err(LedgerError::Halted);
        }

        Self::extend_locked(&mut state, suffix)
    }

    /// Apply a rotation's ledger changes as one critical section:
    /// extend with the authority's tail (if any), then append the
    /// KEY_ROTATED record. Plain appenders cannot interleave with the
    /// commit step.
    pub(crate) async fn append_rotation(
        &self,
        remote_tail: Vec<AuditRecord>,
        actor: &str,
        details: HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> Result<AuditRecord, LedgerError> {
        let mut state = self.state.lock().await;
        if state.halted {
            return Err(LedgerError::Halted);
        }

        if !remote_tail.is_empty() {
            Self::extend_locked(&mut state, remote_tail)?;
        }

        Ok(Self::append_locked(
            &mut state,
            EventType::KeyRotated,
            actor,
            details,
            timestamp,
        ))
    }

    fn append_locked(
        state: &mut LedgerState,
        event_type: EventType,
        actor: &str,
        details: HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> AuditRecord {
        let record = AuditRecord::new(
            state.next_id,
            Uuid::new_v4().to_string(),
            event_type,
            actor.to_string(),
            details,
            timestamp,
            state.tail_hash.clone(),
        );

        state.tail_hash = record.record_hash.clone();
        state.next_id += 1;
        state.records.push(record.clone());

        debug!("appended audit record: {}", record.summary());
        record
    }

    fn extend_locked(
        state: &mut LedgerState,
        suffix: Vec<AuditRecord>,
    ) -> Result<usize, LedgerError> {
        if let Err(violation) = chain::verify(&suffix, &state.tail_hash) {
            return Err(LedgerError::IntegrityViolation {
                broken_at_id: violation.record_id,
            });
        }

        for (offset, record) in suffix.iter().enumerate() {
            let expected = state.next_id + offset as u64;
            if record.id != expected {
                return Err(LedgerError::IntegrityViolation {
                    broken_at_id: record.id,
                });
            }
        }

        if let Some(last) = suffix.last() {
            state.tail_hash = last.record_hash.clone();
        }
        state.next_id += suffix.len() as u64;

        let appended = suffix.len();
        state.records.extend(suffix);

        debug!(appended, "extended audit chain from remote tail");
        Ok(appended)
    }

    /// Verify the stored chain, optionally only the suffix starting at
    /// `from_id`. A failed pass halts further appends to avoid
    /// compounding damage.
    pub async fn verify_chain(&self, from_id: Option<u64>) -> VerificationReport {
        let mut state = self.state.lock().await;

        let start = match from_id {
            Some(id) => state
                .records
                .iter()
                .position(|r| r.id >= id)
                .unwrap_or(state.records.len()),
            None => 0,
        };
        let anchor = if start == 0 {
            GENESIS_HASH.to_string()
        } else {
            state.records[start - 1].record_hash.clone()
        };

        let suffix_len = state.records.len() - start;
        let result = chain::verify(&state.records[start..], &anchor);
        match result {
            Ok(()) => VerificationReport {
                ok: true,
                broken_at_id: None,
                records_checked: suffix_len,
            },
            Err(violation) => {
                state.halted = true;
                error!(
                    record_id = violation.record_id,
                    "audit chain verification failed; ledger halted"
                );
                VerificationReport {
                    ok: false,
                    broken_at_id: Some(violation.record_id),
                    records_checked: violation.index + 1,
                }
            }
        }
    }

    /// Hash of the most recent record, or the genesis hash when empty.
    pub async fn tail_hash(&self) -> String {
        self.state.lock().await.tail_hash.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    pub async fn is_halted(&self) -> bool {
        self.state.lock().await.halted
    }

    pub async fn all_records(&self) -> Vec<AuditRecord> {
        self.state.lock().await.records.clone()
    }

    /// Serialize the committed records for the cache store.
    pub async fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let state = self.state.lock().await;
        Ok(serde_json::to_vec(&state.records)?)
    }

    /// Deserialize and re-verify a ledger previously written with
    /// [`AuditLedger::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        let records: Vec<AuditRecord> = serde_json::from_slice(bytes)?;
        Self::from_records(records)
    }
}

impl Default for AuditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> HashMap<String, String> {
        let mut details = HashMap::new();
        details.insert("status".to_string(), "success".to_string());
        details
    }

    #[tokio::test]
    async fn test_appended_chain_verifies() {
        let ledger = AuditLedger::new();

        for _ in 0..5 {
            ledger
                .append(EventType::Encrypt, "securecypher-01", details(), Utc::now())
                .await
                .unwrap();
        }

        let report = ledger.verify_chain(None).await;
        assert!(report.ok);
        assert_eq!(report.records_checked, 5);
        assert_eq!(ledger.len().await, 5);
    }

    #[tokio::test]
    async fn test_append_links_against_current_tail() {
        let ledger = AuditLedger::new();

        let first = ledger
            .append(EventType::Sign, "op", details(), Utc::now())
            .await
            .unwrap();
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(first.id, 1);

        let second = ledger
            .append(EventType::Verify, "op", details(), Utc::now())
            .await
            .unwrap();
        assert_eq!(second.prev_hash, first.record_hash);
        assert_eq!(second.id, 2);
        assert_eq!(ledger.tail_hash().await, second.record_hash);
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_fork_the_tail() {
        let ledger = AuditLedger::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append(EventType::Decrypt, "op", HashMap::new(), Utc::now())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = ledger.all_records().await;
        assert_eq!(records.len(), 16);

        let mut prev_hashes: Vec<&str> = records.iter().map(|r| r.prev_hash.as_str()).collect();
        prev_hashes.sort();
        prev_hashes.dedup();
        assert_eq!(prev_hashes.len(), 16);

        assert!(ledger.verify_chain(None).await.ok);
    }

    #[tokio::test]
    async fn test_verify_chain_suffix() {
        let ledger = AuditLedger::new();
        for _ in 0..4 {
            ledger
                .append(EventType::Encrypt, "op", HashMap::new(), Utc::now())
                .await
                .unwrap();
        }

        let report = ledger.verify_chain(Some(3)).await;
        assert!(report.ok);
        assert_eq!(report.records_checked, 2);
    }

    #[tokio::test]
    async fn test_corruption_halts_the_ledger() {
        let ledger = AuditLedger::new();
        for _ in 0..3 {
            ledger
                .append(EventType::Encrypt, "op", HashMap::new(), Utc::now())
                .await
                .unwrap();
        }

        {
            let mut state = ledger.state.lock().await;
            state.records[1].actor = "intruder".to_string();
        }

        let report = ledger.verify_chain(None).await;
        assert!(!report.ok);
        assert_eq!(report.broken_at_id, Some(2));
        assert!(ledger.is_halted().await);

        let result = ledger
            .append(EventType::Encrypt, "op", HashMap::new(), Utc::now())
            .await;
        assert!(matches!(result, Err(LedgerError::Halted)));
    }

    #[tokio::test]
    async fn test_round_trip_preserves_chain() {
        let ledger = AuditLedger::new();
        for _ in 0..3 {
            ledger
                .append(EventType::Verify, "op", details(), Utc::now())
                .await
                .unwrap();
        }

        let bytes = ledger.to_bytes().await.unwrap();
        let reloaded = AuditLedger::from_bytes(&bytes).unwrap();

        assert_eq!(reloaded.len().await, 3);
        assert_eq!(reloaded.tail_hash().await, ledger.tail_hash().await);
        assert!(reloaded.verify_chain(None).await.ok);

        let appended = reloaded
            .append(EventType::Sign, "op", details(), Utc::now())
            .await
            .unwrap();
        assert_eq!(appended.id, 4);
    }

    #[tokio::test]
    async fn test_from_bytes_rejects_tampered_records() {
        let ledger = AuditLedger::new();
        for _ in 0..2 {
            ledger
                .append(EventType::Encrypt, "op", HashMap::new(), Utc::now())
                .await
                .unwrap();
        }

        let mut records = ledger.all_records().await;
        records[0].actor = "intruder".to_string();
        let bytes = serde_json::to_vec(&records).unwrap();

        let result = AuditLedger::from_bytes(&bytes);
        assert!(matches!(
            result,
            Err(LedgerError::IntegrityViolation { broken_at_id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_extend_rejects_mismatched_anchor() {
        let ledger = AuditLedger::new();
        ledger
            .append(EventType::Encrypt, "op", HashMap::new(), Utc::now())
            .await
            .unwrap();

        let stray = AuditRecord::new(
            2,
            "tx_stray".to_string(),
            EventType::Verify,
            "remote".to_string(),
            HashMap::new(),
            Utc::now(),
            GENESIS_HASH.to_string(),
        );

        let result = ledger.extend(vec![stray]).await;
        assert!(matches!(
            result,
            Err(LedgerError::IntegrityViolation { broken_at_id: 2 })
        ));
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_extend_appends_linked_suffix() {
        let ledger = AuditLedger::new();
        ledger
            .append(EventType::Encrypt, "op", HashMap::new(), Utc::now())
            .await
            .unwrap();

        let tail = ledger.tail_hash().await;
        let remote = AuditRecord::new(
            2,
            "tx_remote".to_string(),
            EventType::Verify,
            "remote".to_string(),
            HashMap::new(),
            Utc::now(),
            tail,
        );
        let remote_hash = remote.record_hash.clone();

        let appended = ledger.extend(vec![remote]).await.unwrap();
        assert_eq!(appended, 1);
        assert_eq!(ledger.len().await, 2);
        assert_eq!(ledger.tail_hash().await, remote_hash);
        assert!(ledger.verify_chain(None).await.ok);
    }
}
