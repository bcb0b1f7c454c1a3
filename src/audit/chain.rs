//! Hash Chain
//!
//! Deterministic linkage and verification primitive for audit record
//! sequences. Holds no mutable state of its own.

use sha2::{Digest, Sha256};

use crate::audit::record::AuditRecord;

/// Fixed `prev_hash` of the first record in a chain.
pub const GENESIS_HASH: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// Compute the linkage digest for a record following `prev_hash`.
pub fn link(prev_hash: &str, record: &AuditRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(record.canonical_fields().as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// First broken link found by [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainViolation {
    pub index: usize,
    pub record_id: u64,
    pub expected: String,
    pub claimed: String,
}

/// Verify that `records` forms an unbroken chain anchored at `anchor`.
///
/// Recomputes every link and stops at the first mismatch, reporting
/// where the chain diverged. An empty sequence is trivially valid; a
/// fresh chain's anchor is [`GENESIS_HASH`].
pub fn verify(records: &[AuditRecord], anchor: &str) -> Result<(), ChainViolation> {
    let mut prev = anchor.to_string();

    for (index, record) in records.iter().enumerate() {
        if record.prev_hash != prev {
            return Err(ChainViolation {
                index,
                record_id: record.id,
                expected: prev,
                claimed: record.prev_hash.clone(),
            });
        }

        let recomputed = link(&record.prev_hash, record);
        if record.record_hash != recomputed {
            return Err(ChainViolation {
                index,
                record_id: record.id,
                expected: recomputed,
                claimed: record.record_hash.clone(),
            });
        }

        prev = record.record_hash.clone();
    }

    Ok(())
}
