//! Error types for the geograin core.

use thiserror::Error;

use crate::directory::{GrainId, RegistrationStrategy};
use crate::replication::AdaptorStatus;

/// A work cycle ended without reporting a result.
///
/// Waiters holding a cycle handle observe this when the local task set is
/// torn down underneath them, or when the work itself panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("work cycle ended without a result")]
pub struct CycleCancelled;

/// Errors surfaced by a [`BatchWorker`](crate::worker::BatchWorker) cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The batch work reported a failure.
    #[error("batch work failed: {0}")]
    Failed(String),

    /// The cycle was dropped or panicked.
    #[error(transparent)]
    Cancelled(#[from] CycleCancelled),
}

/// Errors from the versioned storage backend.
///
/// `Clone` so a failed flush cycle can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Conditional write rejected: the stored version moved on.
    #[error("version conflict: expected {expected}, found {actual}")]
    Conflict {
        /// Version the writer expected.
        expected: u64,
        /// Version currently in the store.
        actual: u64,
    },

    /// The backend could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// State could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure.
    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// True for an optimistic-concurrency version mismatch.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors from the replicated log-view protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// Every conditional write attempt of a flush cycle hit a conflict.
    #[error("could not update primary storage after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Storage failure other than a version conflict.
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Operation not allowed in the adaptor's current lifecycle state.
    #[error("invalid adaptor state transition from {from:?} to {to:?}")]
    InvalidState {
        /// State the adaptor was in.
        from: AdaptorStatus,
        /// State the operation needed to move to.
        to: AdaptorStatus,
    },

    /// The flush cycle was dropped or panicked.
    #[error(transparent)]
    Cancelled(#[from] CycleCancelled),
}

/// Malformed parsable node identity string.
///
/// Every variant carries the offending fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityParseError {
    /// A mandatory separator is missing.
    #[error("missing '{separator}' separator in {input:?}")]
    MissingSeparator {
        /// The separator that was expected.
        separator: char,
        /// The whole input.
        input: String,
    },

    /// The endpoint address could not be parsed.
    #[error("invalid endpoint {fragment:?}")]
    Endpoint {
        /// Offending substring.
        fragment: String,
    },

    /// The port could not be parsed.
    #[error("invalid port {fragment:?}")]
    Port {
        /// Offending substring.
        fragment: String,
    },

    /// The generation could not be parsed.
    #[error("invalid generation {fragment:?}")]
    Generation {
        /// Offending substring.
        fragment: String,
    },

    /// The cluster tag contains a reserved character.
    #[error("invalid cluster tag {fragment:?}")]
    Cluster {
        /// Offending substring.
        fragment: String,
    },
}

/// Errors from grain registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrarError {
    /// No registrar installed for the requested strategy.
    #[error("no registrar for strategy {0:?}")]
    NoRegistrar(RegistrationStrategy),

    /// A remote cluster's directory failed to answer.
    #[error("remote cluster {cluster} failed: {reason}")]
    Remote {
        /// Cluster that failed.
        cluster: String,
        /// Failure description.
        reason: String,
    },
}

/// More than one cluster claimed definite ownership of a grain.
///
/// Not returned from any operation: the response tracker logs it and keeps
/// resolving with the first claim that arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{claims} clusters claim definite ownership of {grain}")]
pub struct AggregationViolation {
    /// Grain being registered.
    pub grain: GrainId,
    /// Number of definite ownership claims seen.
    pub claims: usize,
}
