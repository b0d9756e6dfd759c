use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Result, TransactionContext, Transport, TransportError, TransportMessage};

/// In-process message network shared by any number of in-memory transports.
///
/// Queues must be created before messages can be delivered to them.
#[derive(Clone, Default)]
pub struct InMemNetwork {
    queues: Arc<RwLock<HashMap<String, VecDeque<TransportMessage>>>>,
    redeliveries: Arc<AtomicU64>,
}

impl InMemNetwork {
    /// Creates a new empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue. Creating an existing queue is a no-op.
    pub async fn create_queue(&self, address: &str) {
        self.queues
            .write()
            .await
            .entry(address.to_string())
            .or_default();
    }

    /// Returns true if the queue exists.
    pub async fn has_queue(&self, address: &str) -> bool {
        self.queues.read().await.contains_key(address)
    }

    /// Appends a message to the end of a queue.
    pub async fn deliver(&self, address: &str, message: TransportMessage) -> Result<()> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(address)
            .ok_or_else(|| TransportError::QueueNotFound(address.to_string()))?;
        queue.push_back(message);
        Ok(())
    }

    /// Takes the message at the head of a queue.
    pub async fn get_next(&self, address: &str) -> Result<Option<TransportMessage>> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(address)
            .ok_or_else(|| TransportError::QueueNotFound(address.to_string()))?;
        Ok(queue.pop_front())
    }

    /// Returns the number of messages waiting in a queue.
    pub async fn count(&self, address: &str) -> usize {
        self.queues
            .read()
            .await
            .get(address)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Returns how many received messages were put back because their
    /// transaction context did not commit.
    pub fn redelivery_count(&self) -> u64 {
        self.redeliveries.load(Ordering::SeqCst)
    }

    /// Removes all queues and messages.
    pub async fn reset(&self) {
        self.queues.write().await.clear();
        self.redeliveries.store(0, Ordering::SeqCst);
    }

    async fn redeliver(&self, address: &str, message: TransportMessage) {
        self.redeliveries.fetch_add(1, Ordering::SeqCst);
        if let Err(error) = self.deliver(address, message).await {
            tracing::error!(%address, error = %error, "could not put message back for redelivery");
        }
    }
}

/// Transport backed by an [`InMemNetwork`].
///
/// Sends are delivered when the sending context commits. Received messages
/// go back to the end of the input queue unless the receiving context
/// commits cleanly, which mirrors a broker's visibility timeout.
#[derive(Clone)]
pub struct InMemoryTransport {
    network: InMemNetwork,
    input_queue: Option<String>,
}

impl InMemoryTransport {
    /// Creates a transport that receives from `input_queue`.
    pub fn new(network: InMemNetwork, input_queue: impl Into<String>) -> Self {
        Self {
            network,
            input_queue: Some(input_queue.into()),
        }
    }

    /// Creates a transport that can only send.
    pub fn send_only(network: InMemNetwork) -> Self {
        Self {
            network,
            input_queue: None,
        }
    }

    /// Returns the network this transport is attached to.
    pub fn network(&self) -> &InMemNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn address(&self) -> Option<&str> {
        self.input_queue.as_deref()
    }

    async fn create_queue(&self, address: &str) -> Result<()> {
        self.network.create_queue(address).await;
        Ok(())
    }

    async fn send(
        &self,
        destination_address: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<()> {
        if !self.network.has_queue(destination_address).await {
            return Err(TransportError::QueueNotFound(
                destination_address.to_string(),
            ));
        }

        let network = self.network.clone();
        let destination = destination_address.to_string();
        context.on_committed(move || async move {
            network.deliver(&destination, message).await?;
            Ok(())
        });

        Ok(())
    }

    async fn receive(&self, context: &TransactionContext) -> Result<Option<TransportMessage>> {
        let queue = self.input_queue.as_deref().ok_or(TransportError::SendOnly)?;

        let Some(message) = self.network.get_next(queue).await? else {
            return Ok(None);
        };

        let network = self.network.clone();
        let queue = queue.to_string();
        let pending = message.clone();
        context.on_disposed(move |outcome| async move {
            if !outcome.is_committed() {
                tracing::debug!(%queue, %outcome, "returning uncommitted message to queue");
                network.redeliver(&queue, pending).await;
            }
            Ok(())
        });

        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Headers;

    fn message(body: &str) -> TransportMessage {
        TransportMessage::new(Headers::new(), body.as_bytes().to_vec())
    }

    async fn transport() -> InMemoryTransport {
        let network = InMemNetwork::new();
        let transport = InMemoryTransport::new(network, "input");
        transport.create_queue("input").await.unwrap();
        transport
    }

    #[tokio::test]
    async fn send_is_deferred_until_commit() {
        let transport = transport().await;
        let context = TransactionContext::new();

        transport.send("input", message("a"), &context).await.unwrap();
        assert_eq!(transport.network().count("input").await, 0);

        context.complete().await.unwrap();
        context.dispose().await;
        assert_eq!(transport.network().count("input").await, 1);
    }

    #[tokio::test]
    async fn aborted_send_is_never_delivered() {
        let transport = transport().await;
        let context = TransactionContext::new();

        transport.send("input", message("a"), &context).await.unwrap();
        context.dispose().await;

        assert_eq!(transport.network().count("input").await, 0);
    }

    #[tokio::test]
    async fn committed_receive_consumes_the_message() {
        let transport = transport().await;
        transport.network().deliver("input", message("a")).await.unwrap();

        let context = TransactionContext::new();
        let received = transport.receive(&context).await.unwrap();
        assert_eq!(received, Some(message("a")));
        context.complete().await.unwrap();
        context.dispose().await;

        assert_eq!(transport.network().count("input").await, 0);
        assert_eq!(transport.network().redelivery_count(), 0);
    }

    #[tokio::test]
    async fn uncommitted_receive_makes_the_message_available_again() {
        let transport = transport().await;
        transport.network().deliver("input", message("a")).await.unwrap();

        let context = TransactionContext::new();
        transport.receive(&context).await.unwrap();
        context.dispose().await;

        assert_eq!(transport.network().count("input").await, 1);
        assert_eq!(transport.network().redelivery_count(), 1);
    }

    #[tokio::test]
    async fn failed_commit_makes_the_message_available_again() {
        let transport = transport().await;
        transport.network().deliver("input", message("a")).await.unwrap();

        let context = TransactionContext::new();
        transport.receive(&context).await.unwrap();
        context.on_committed(|| async { Err(anyhow::anyhow!("ack lost")) });
        assert!(context.complete().await.is_err());
        context.dispose().await;

        assert_eq!(transport.network().count("input").await, 1);
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let transport = transport().await;
        let context = TransactionContext::new();
        assert!(transport.receive(&context).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_queue_fails() {
        let transport = transport().await;
        let context = TransactionContext::new();
        let result = transport.send("nowhere", message("a"), &context).await;
        assert!(matches!(result, Err(TransportError::QueueNotFound(q)) if q == "nowhere"));
    }

    #[tokio::test]
    async fn send_only_transport_cannot_receive() {
        let transport = InMemoryTransport::send_only(InMemNetwork::new());
        let context = TransactionContext::new();
        assert!(transport.address().is_none());
        assert!(matches!(
            transport.receive(&context).await,
            Err(TransportError::SendOnly)
        ));
    }
}
