use std::path::PathBuf;

/// Errors from ledger storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ledger could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The atomic rename over the target path failed.
    #[error("failed to replace {path}: {reason}")]
    Replace { path: PathBuf, reason: String },

    /// A previous holder of the ledger lock panicked.
    #[error("ledger lock poisoned")]
    LockPoisoned,

    /// Storage backend rejected the write.
    #[error("store is read-only")]
    ReadOnly,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
