//! Key Management
//!
//! Tracks the cryptographic key set and its rotation history.

pub mod registry;

pub use registry::{InstallOutcome, Key, KeyRegistry};
