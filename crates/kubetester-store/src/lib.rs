//! Persisted environment state for kubetester.
//!
//! This crate provides the storage layer: the `StateDocument` recording what
//! each saga has created, the `StateStore` trait the orchestrator writes through
//! after every phase, a checksummed `FileStateStore` with atomic replacement,
//! an in-memory `MemoryStateStore`, and the on-disk `StateLayout`.

pub mod layout;
pub mod state;

pub use layout::{StateLayout, STATE_FILE};
pub use state::{
    ClusterRefs, ComponentState, FileStateStore, MemoryStateStore, ResourceState, StateDocument,
    StateStore, STATE_FORMAT_VERSION,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state document '{path}' failed integrity check: expected {expected}, got {actual}")]
    IntegrityFailure {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("state document '{0}' has no checksum")]
    MissingChecksum(String),
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
