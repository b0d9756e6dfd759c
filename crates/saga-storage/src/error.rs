use thiserror::Error;

use crate::{Revision, SagaId};

/// Errors that can occur when interacting with saga storage.
#[derive(Debug, Error)]
pub enum SagaStorageError {
    /// The stored revision differs from the revision the caller last read.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected revision {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Revision,
        actual: Revision,
    },

    /// The saga was deleted or never inserted.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// An instance with this identity already exists.
    #[error("Saga {0} already exists")]
    DuplicateSagaId(SagaId),

    /// Another instance of the same saga type already owns this correlation value.
    #[error("Correlation conflict for {saga_type}.{property_name} = {value:?}")]
    CorrelationConflict {
        saga_type: String,
        property_name: String,
        value: String,
    },

    /// More than one instance matches a correlation value.
    #[error("{matches} instances of {saga_type} match {property_name} = {value:?}")]
    AmbiguousCorrelation {
        saga_type: String,
        property_name: String,
        value: String,
        matches: usize,
    },

    /// Inserts must start from the initial revision.
    #[error("Saga {saga_id} must be inserted at revision 0, got {revision}")]
    InvalidRevision { saga_id: SagaId, revision: Revision },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaStorageError {
    /// True when the caller read stale state and should reload and retry.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            SagaStorageError::ConcurrencyConflict { .. } | SagaStorageError::SagaNotFound(_)
        )
    }

    /// True for uniqueness violations that indicate broken correlation setup
    /// or a lost insert race.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SagaStorageError::DuplicateSagaId(_)
                | SagaStorageError::CorrelationConflict { .. }
                | SagaStorageError::AmbiguousCorrelation { .. }
                | SagaStorageError::InvalidRevision { .. }
        )
    }
}

/// Result type for saga storage operations.
pub type Result<T> = std::result::Result<T, SagaStorageError>;
