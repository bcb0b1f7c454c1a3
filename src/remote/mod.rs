//! Remote Authority
//!
//! Narrow request/response contract with the remote signing service
//! that performs the actual rotations and owns canonical state.

pub mod client;
pub mod mock;

pub use client::HttpRemoteAuthority;
pub use mock::MockRemoteAuthority;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audit::AuditRecord;
use crate::error::RemoteError;
use crate::keys::Key;

/// Response to a rotation request. A missing key means the authority
/// acknowledged the request without returning new state; the caller
/// must reconcile to learn the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationResponse {
    pub new_key: Option<Key>,
    #[serde(default)]
    pub audit_tail: Vec<AuditRecord>,
}

/// Point-in-time authoritative copy of keys and recent audit tail.
/// Consumed once by the reconciliation engine, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSnapshot {
    pub keys: Vec<Key>,
    pub audit_tail: Vec<AuditRecord>,
    pub tail_anchor_hash: String,
}

#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Ask the authority to rotate away from `current_key_id`.
    async fn request_rotation(
        &self,
        current_key_id: Option<&str>,
        reason: &str,
    ) -> Result<RotationResponse, RemoteError>;

    /// Read-only fetch of the authoritative keys and recent audit tail.
    async fn fetch_snapshot(&self) -> Result<ReconciliationSnapshot, RemoteError>;
}
