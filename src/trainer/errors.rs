use thiserror::Error;

use crate::validation::ValidationError;

/// Errors that can arise while interacting with the trainer core.
#[derive(Debug, Error)]
pub enum TrainerError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, seed files, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a seed file or an opaque payload.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Administrative or gameplay input rejected before any write.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Store-level integrity failure; the write was aborted.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// The actor may not see or do this (locked level, someone else's result).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A play session was driven out of order.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Messaging sink or identity provider failure.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The engine stopped accepting new sessions after a fatal store error.
    #[error("store unavailable; not accepting new sessions")]
    StoreUnavailable,

    /// Internal error (unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl TrainerError {
    /// Store-connection level failures. Everything else is a per-request failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrainerError::Sled(_) | TrainerError::Io(_))
    }
}

impl From<sled::transaction::TransactionError<TrainerError>> for TrainerError {
    fn from(err: sled::transaction::TransactionError<TrainerError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => TrainerError::Sled(e),
        }
    }
}
