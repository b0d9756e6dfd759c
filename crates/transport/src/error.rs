use thiserror::Error;

/// Errors that can occur when talking to a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination queue does not exist.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// `receive` was called on a transport without an input queue.
    #[error("Transport has no input queue and cannot receive")]
    SendOnly,
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
