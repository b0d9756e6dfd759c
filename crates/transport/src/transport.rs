use std::sync::Arc;

use async_trait::async_trait;

use crate::{Result, TransactionContext, TransportMessage};

/// Minimal capability every transport provides.
///
/// A transport only moves opaque messages between queues. It ties the
/// durability of its operations to the transaction context passed in:
///
/// - `send` may defer the actual I/O until the context commits.
/// - A message returned from `receive` counts as consumed only once the
///   context commits cleanly. If the context is disposed without a clean
///   commit, the message must become available for redelivery.
///
/// Decorators implement this same trait around an inner transport and
/// must never alter message content.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the input queue address, or `None` for a send-only transport.
    fn address(&self) -> Option<&str>;

    /// Ensures the queue exists. Idempotent; a no-op when the medium has
    /// no notion of queue creation.
    async fn create_queue(&self, address: &str) -> Result<()>;

    /// Enqueues a message for delivery to `destination_address`.
    async fn send(
        &self,
        destination_address: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<()>;

    /// Returns the next available message, or `None` when nothing is ready.
    ///
    /// Never blocks waiting for messages; callers poll with backoff.
    async fn receive(&self, context: &TransactionContext) -> Result<Option<TransportMessage>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn address(&self) -> Option<&str> {
        (**self).address()
    }

    async fn create_queue(&self, address: &str) -> Result<()> {
        (**self).create_queue(address).await
    }

    async fn send(
        &self,
        destination_address: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<()> {
        (**self).send(destination_address, message, context).await
    }

    async fn receive(&self, context: &TransactionContext) -> Result<Option<TransportMessage>> {
        (**self).receive(context).await
    }
}
