//! Saga error types.

use common::SagaId;
use thiserror::Error;

/// Errors that can occur while defining sagas or resolving saga instances.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Different correlation properties of one message found different instances.
    #[error("Message {message_type} correlates with several {saga_type} instances: {matches:?}")]
    AmbiguousCorrelation {
        saga_type: String,
        message_type: String,
        matches: Vec<SagaId>,
    },

    /// A message type is handled by a saga that declares no correlation for it.
    #[error("Saga {saga_type} handles {message_type} but declares no correlation for it")]
    MissingCorrelation {
        saga_type: String,
        message_type: String,
    },

    /// A correlation names a property that the saga data does not have.
    #[error("Saga {saga_type} correlates {message_type} on unknown data property {property_name}")]
    UnknownCorrelationProperty {
        saga_type: String,
        message_type: String,
        property_name: String,
    },

    /// A message matched no instance and may not create one.
    #[error("Message {message_type} does not match any {saga_type} instance and cannot initiate one")]
    UnmatchedMessage {
        saga_type: String,
        message_type: String,
    },

    /// An idempotent saga received a message without a message id, so a
    /// redelivery could not be recognized.
    #[error("Idempotent saga {saga_type} cannot handle {message_type} without a message id")]
    MissingMessageId {
        saga_type: String,
        message_type: String,
    },

    /// A saga invoker was invoked without an attached instance.
    #[error("No {0} instance attached; is the saga data step in the receive pipeline?")]
    NoInstanceAttached(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// True for errors caused by saga definitions or conflicting data rather
    /// than by a transient condition.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            SagaError::AmbiguousCorrelation { .. }
            | SagaError::MissingCorrelation { .. }
            | SagaError::UnknownCorrelationProperty { .. }
            | SagaError::NoInstanceAttached(_) => true,
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
