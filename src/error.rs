use thiserror::Error;

/// Errors surfaced by the rotation coordinator.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("a rotation is already in flight")]
    AlreadyRotating,

    #[error("remote authority unreachable: {0}")]
    Unreachable(String),

    #[error("rotation commit incomplete: {0}")]
    PartialCommit(String),

    #[error("rotation outcome unconfirmed: {0}")]
    UnconfirmedResult(String),

    #[error("stale rotation response: expected key version {expected}, got {found}")]
    VersionConflict { expected: u64, found: u64 },
}

/// Errors surfaced by the reconciliation engine.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("remote key set regresses local state (local max v{local}, remote max v{remote})")]
    Regression { local: u64, remote: u64 },

    #[error("audit chain fork at record {at_id}")]
    ChainFork { at_id: u64 },

    #[error("remote audit tail shares no ancestry with the local chain")]
    Disjoint,

    #[error("remote authority unreachable: {0}")]
    Unreachable(String),

    #[error("snapshot rejected: {0}")]
    InvalidSnapshot(String),

    #[error("ledger is halted after an integrity violation")]
    LedgerHalted,

    #[error("cache store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the key registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("version conflict: expected v{expected}, got v{found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("key set invariant violated: {0}")]
    InvariantViolation(String),
}

/// Errors raised by the audit ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("audit chain integrity violation at record {broken_at_id}")]
    IntegrityViolation { broken_at_id: u64 },

    #[error("ledger is halted after an integrity violation")]
    Halted,

    #[error("audit record serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by cache store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cached state serialization error: {0}")]
    Serialization(String),

    #[error("cached state corrupt: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by remote authority clients.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote authority returned HTTP {0}")]
    Status(u16),

    #[error("malformed remote response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
