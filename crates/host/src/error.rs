//! Host startup errors.

use bus::BusError;
use saga_storage::SagaStorageError;
use thiserror::Error;

/// Errors that stop the host from starting or serving.
#[derive(Debug, Error)]
pub enum HostError {
    /// The bus failed to start.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// The saga storage could not be prepared.
    #[error("Saga storage error: {0}")]
    Storage(#[from] SagaStorageError),

    /// Connecting to the database failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Binding or serving the HTTP listener failed.
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
