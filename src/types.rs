//! Error taxonomy and shared result alias.

use thiserror::Error;

/// Errors surfaced by the mirroring engine and its collaborators.
///
/// Only primary (user-visible) writes propagate these to callers; downstream
/// mirror, override, and exclusion writes are caught and logged so a
/// mirroring hiccup never blocks the caller's own data from saving.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Referenced record, tenant, or invitation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not permitted in the record's current state
    /// (e.g. transfer of an already-mirrored record). No partial write
    /// is performed when this is raised.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A canonical- or mirror-side write failed after the primary write
    /// succeeded. Carries enough context to retry manually or to be picked
    /// up by a later reconciliation pass. The primary write is never rolled
    /// back.
    #[error("propagation of {operation} for record '{record_id}' to tenant '{tenant}' failed: {message}")]
    Propagation {
        record_id: String,
        tenant: String,
        operation: String,
        message: String,
    },

    /// Every chunk of a fan-out batch failed. Partial success is reported
    /// as counts, not as an error.
    #[error("batch commit failed: {succeeded}/{attempted} mutations applied")]
    BatchPartialFailure { attempted: usize, succeeded: usize },

    /// Underlying document store failure.
    #[error("database error: {0}")]
    Database(String),

    /// Invariant violation inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
