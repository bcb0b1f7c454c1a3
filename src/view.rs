//! Read Model
//!
//! Pure projections of core state for the console pages. Nothing here
//! mutates the registry or the ledger, and no core invariant depends
//! on how these are rendered.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditLedger, AuditRecord};
use crate::keys::{Key, KeyRegistry};

/// Key card for the key-management page.
#[derive(Debug, Clone, Serialize)]
pub struct KeyView {
    pub key_id: String,
    pub public_material_abbrev: String,
    pub algorithm: String,
    pub version: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl From<Key> for KeyView {
    fn from(key: Key) -> Self {
        Self {
            public_material_abbrev: abbreviate(&key.public_material),
            key_id: key.key_id,
            algorithm: key.algorithm,
            version: key.version,
            active: key.active,
            created_at: key.created_at,
            rotated_at: key.rotated_at,
        }
    }
}

// The console shows `MIIBIjANBgkqhkiG9w0B...KxG` style material.
fn abbreviate(material: &str) -> String {
    let tail_start = material.len().saturating_sub(10);
    match (material.get(..20), material.get(tail_start..)) {
        (Some(head), Some(tail)) if material.len() > 33 => format!("{}...{}", head, tail),
        _ => material.to_string(),
    }
}

/// One page of audit records, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

pub async fn list_keys(registry: &KeyRegistry) -> Vec<KeyView> {
    registry
        .all_keys()
        .await
        .into_iter()
        .map(KeyView::from)
        .collect()
}

pub async fn list_audit_records(ledger: &AuditLedger, page: usize, page_size: usize) -> AuditPage {
    let mut records = ledger.all_records().await;
    let total = records.len();
    records.reverse();

    let records = records
        .into_iter()
        .skip(page.saturating_mul(page_size))
        .take(page_size)
        .collect();

    AuditPage {
        records,
        page,
        page_size,
        total,
    }
}
