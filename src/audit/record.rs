//! Audit Records
//!
//! Defines the hash-chained record type for tamper-evident logging
//! of cryptographic operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::audit::chain;

/// Operation kinds recorded in the audit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    KeyRotated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Encrypt => "ENCRYPT",
            EventType::Decrypt => "DECRYPT",
            EventType::Sign => "SIGN",
            EventType::Verify => "VERIFY",
            EventType::KeyRotated => "KEY_ROTATED",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENCRYPT" => Ok(EventType::Encrypt),
            "DECRYPT" => Ok(EventType::Decrypt),
            "SIGN" => Ok(EventType::Sign),
            "VERIFY" => Ok(EventType::Verify),
            "KEY_ROTATED" => Ok(EventType::KeyRotated),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// One committed operation in the audit chain. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    pub transaction_id: String,
    pub event_type: EventType,
    pub actor: String,
    pub details: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub record_hash: String,
}

impl AuditRecord {
    /// Build a record linked against `prev_hash`. The record hash is
    /// computed here and never recalculated afterwards.
    pub fn new(
        id: u64,
        transaction_id: String,
        event_type: EventType,
        actor: String,
        details: HashMap<String, String>,
        timestamp: DateTime<Utc>,
        prev_hash: String,
    ) -> Self {
        let mut record = Self {
            id,
            transaction_id,
            event_type,
            actor,
            details,
            timestamp,
            prev_hash,
            record_hash: String::new(),
        };

        record.record_hash = chain::link(&record.prev_hash, &record);
        record
    }

    /// Canonical field string hashed into the chain. Field order is
    /// fixed, timestamps are RFC 3339, details pairs are sorted.
    pub fn canonical_fields(&self) -> String {
        format!(
            "id:{}|transaction_id:{}|event_type:{}|actor:{}|timestamp:{}|details:{}",
            self.id,
            self.transaction_id,
            self.event_type.as_str(),
            self.actor,
            self.timestamp.to_rfc3339(),
            self.serialize_details()
        )
    }

    fn serialize_details(&self) -> String {
        let mut items: Vec<String> = self
            .details
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        items.sort(); // Ensure deterministic ordering
        items.join(",")
    }

    /// Recompute this record's hash and compare against the stored one.
    pub fn verify_hash(&self) -> bool {
        self.record_hash == chain::link(&self.prev_hash, self)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!("#{} {} by {}", self.id, self.event_type.as_str(), self.actor)
    }
}
