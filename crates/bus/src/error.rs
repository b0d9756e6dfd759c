//! Bus error types.

use pipeline::PipelineError;
use saga::SagaError;
use thiserror::Error;
use transport::{TransactionError, TransportError};

/// Errors that can occur while configuring the bus or dispatching messages.
#[derive(Debug, Error)]
pub enum BusError {
    /// The pipeline could not be resolved.
    #[error("Pipeline configuration error: {0}")]
    Pipeline(#[from] PipelineError),

    /// A saga definition is invalid.
    #[error("Saga configuration error: {0}")]
    Saga(#[from] SagaError),

    /// No transport was configured.
    #[error("No transport configured")]
    MissingTransport,

    /// The transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Completing the transaction failed.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A received message lacks a header the pipeline needs.
    #[error("Message {message_id} has no {header} header")]
    MissingHeader {
        message_id: String,
        header: &'static str,
    },

    /// A received message uses a content type the serializer cannot read.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// No handler was activated for a received message.
    #[error("Message {message_id} of type {message_type} could not be dispatched to any handler")]
    NoHandlers {
        message_id: String,
        message_type: String,
    },

    /// A send-only bus was asked to send to its own queue.
    #[error("Cannot send locally: the bus has no input queue")]
    SendOnly,

    /// The receive pipeline failed for a message.
    #[error("Dispatch of message {message_id} failed: {source}")]
    Dispatch {
        message_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The send pipeline failed.
    #[error("Send failed: {0}")]
    Send(#[source] anyhow::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// True if the transport itself failed, as opposed to a message.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, BusError::Transport(_))
    }
}

/// Convenience type alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;
