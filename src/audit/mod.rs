//! Audit Log System
//!
//! Tamper-evident, hash-chained logging of cryptographic operations.

pub mod chain;
pub mod ledger;
pub mod record;

pub use chain::{ChainViolation, GENESIS_HASH};
pub use ledger::{AuditLedger, VerificationReport};
pub use record::{AuditRecord, EventType};
