//! Receives one message at a time and runs it through the receive pipeline
//! inside its own transaction context.

use std::sync::Arc;
use std::time::Instant;

use pipeline::{IncomingStep, IncomingStepContext, MessageSender, invoke, step_names};
use transport::{TransactionContext, Transport};

use crate::error::{BusError, Result};

/// What one call to [`Dispatcher::process_next`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// No message was ready.
    Idle,
    /// A message went through the pipeline and its transaction committed.
    Committed { message_id: String },
}

/// Glues transport, transaction context and receive pipeline together.
///
/// For every message: create a transaction context, receive, run the
/// pipeline, complete the context only if every step succeeded, and always
/// dispose the context afterwards. A failed message is left to the
/// transport's redelivery.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    steps: Vec<IncomingStep>,
    sender: Arc<dyn MessageSender>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        steps: Vec<IncomingStep>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            transport,
            steps,
            sender,
        }
    }

    /// Names of the receive pipeline steps, in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        step_names(&self.steps)
    }

    /// Receives and processes at most one message.
    pub async fn process_next(&self) -> Result<Dispatched> {
        let transaction = Arc::new(TransactionContext::new());
        let result = self.receive_and_dispatch(&transaction).await;
        transaction.dispose().await;
        result
    }

    #[tracing::instrument(
        skip(self, transaction),
        fields(
            transaction_id = %transaction.id(),
            message_id = tracing::field::Empty,
            message_type = tracing::field::Empty,
        )
    )]
    async fn receive_and_dispatch(&self, transaction: &Arc<TransactionContext>) -> Result<Dispatched> {
        let Some(message) = self.transport.receive(transaction).await? else {
            return Ok(Dispatched::Idle);
        };

        let started = Instant::now();
        let message_id = message
            .message_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let message_type = message
            .header(common::headers::MESSAGE_TYPE)
            .unwrap_or_default()
            .to_string();
        let span = tracing::Span::current();
        span.record("message_id", message_id.as_str());
        span.record("message_type", message_type.as_str());
        metrics::counter!("bus_messages_received_total").increment(1);

        let mut context = IncomingStepContext::new(message, transaction.clone(), self.sender.clone());
        if let Err(source) = invoke(&self.steps, &mut context).await {
            tracing::warn!(error = %source, "Message dispatch failed");
            metrics::counter!("bus_messages_failed_total").increment(1);
            return Err(BusError::Dispatch { message_id, source });
        }

        if let Err(error) = transaction.complete().await {
            tracing::warn!(error = %error, "Transaction commit failed");
            metrics::counter!("bus_messages_failed_total").increment(1);
            return Err(error.into());
        }

        metrics::counter!("bus_messages_committed_total").increment(1);
        metrics::histogram!("bus_dispatch_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::debug!("Message committed");

        Ok(Dispatched::Committed { message_id })
    }
}
