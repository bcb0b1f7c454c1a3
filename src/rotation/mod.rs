//! Key Rotation
//!
//! Single-flight coordination of key rotations against the remote
//! authority.

pub mod coordinator;

pub use coordinator::{RotationCoordinator, RotationEvent, RotationState, RotationStatus};

use std::sync::Arc;
use tokio::sync::Mutex;

/// Lock guarding the (KeyRegistry, AuditLedger) pair. The two are
/// mutated as one unit: a registry update without its audit entry (or
/// the reverse) must be impossible, so every commit and every merge
/// runs under this lock.
pub type PairLock = Arc<Mutex<()>>;

/// Fresh pair lock for wiring a coordinator and an engine together.
pub fn pair_lock() -> PairLock {
    Arc::new(Mutex::new(()))
}
