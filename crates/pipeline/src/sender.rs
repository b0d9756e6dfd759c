//! Sending from inside a message handler.

use std::sync::Arc;

use async_trait::async_trait;
use common::{MessageId, headers};
use transport::{Headers, TransactionContext};

use crate::message::{BusMessage, LogicalMessage};

/// Where an outgoing message should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The sending endpoint's own input queue.
    Local,
    /// A named queue.
    Address(String),
}

/// Runs the outgoing pipeline for a message inside a transaction context.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(
        &self,
        destination: Destination,
        message: LogicalMessage,
        transaction: &Arc<TransactionContext>,
    ) -> anyhow::Result<()>;
}

/// What a handler gets next to the message: its headers and a way to send.
///
/// Everything sent through a message context is enlisted in the transaction
/// of the message being handled, so it is only delivered if that message
/// commits.
#[derive(Clone)]
pub struct MessageContext {
    headers: Headers,
    transaction: Arc<TransactionContext>,
    sender: Arc<dyn MessageSender>,
}

impl MessageContext {
    pub fn new(
        headers: Headers,
        transaction: Arc<TransactionContext>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            headers,
            transaction,
            sender,
        }
    }

    /// Returns a copy that sends through `sender` instead.
    pub fn with_sender(&self, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            headers: self.headers.clone(),
            transaction: self.transaction.clone(),
            sender,
        }
    }

    /// Headers of the message being handled.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.header(headers::MESSAGE_ID).map(MessageId::from)
    }

    pub fn transaction(&self) -> &Arc<TransactionContext> {
        &self.transaction
    }

    pub fn sender(&self) -> &Arc<dyn MessageSender> {
        &self.sender
    }

    /// Sends `message` to the queue at `destination`.
    pub async fn send<M: BusMessage>(&self, destination: &str, message: &M) -> anyhow::Result<()> {
        let logical = LogicalMessage::from_message(message)?;
        self.send_logical(Destination::Address(destination.to_string()), logical)
            .await
    }

    /// Sends `message` to this endpoint's own input queue.
    pub async fn send_local<M: BusMessage>(&self, message: &M) -> anyhow::Result<()> {
        let logical = LogicalMessage::from_message(message)?;
        self.send_logical(Destination::Local, logical).await
    }

    /// Sends `message` to the return address of the message being handled.
    pub async fn reply<M: BusMessage>(&self, message: &M) -> anyhow::Result<()> {
        let Some(return_address) = self.header(headers::RETURN_ADDRESS) else {
            anyhow::bail!(
                "cannot reply: message {:?} has no {} header",
                self.message_id(),
                headers::RETURN_ADDRESS
            );
        };
        let logical = LogicalMessage::from_message(message)?;
        self.send_logical(Destination::Address(return_address.to_string()), logical)
            .await
    }

    /// Sends an already built logical message.
    ///
    /// The correlation id of the message being handled flows on to the
    /// outgoing message unless it already carries one.
    pub async fn send_logical(
        &self,
        destination: Destination,
        mut message: LogicalMessage,
    ) -> anyhow::Result<()> {
        let correlation_id = self
            .header(headers::CORRELATION_ID)
            .or_else(|| self.header(headers::MESSAGE_ID));
        if let Some(correlation_id) = correlation_id {
            message
                .headers_mut()
                .entry(headers::CORRELATION_ID.to_string())
                .or_insert_with(|| correlation_id.to_string());
        }

        self.sender
            .send(destination, message, &self.transaction)
            .await
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("headers", &self.headers)
            .field("transaction", &self.transaction.id())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use super::*;

    /// Collects sent messages instead of running a pipeline.
    #[derive(Default)]
    pub(crate) struct CollectingSender {
        pub sent: Mutex<Vec<(Destination, LogicalMessage)>>,
    }

    #[async_trait]
    impl MessageSender for CollectingSender {
        async fn send(
            &self,
            destination: Destination,
            message: LogicalMessage,
            _transaction: &Arc<TransactionContext>,
        ) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((destination, message));
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Pong;

    impl BusMessage for Pong {
        fn message_type() -> &'static str {
            "Pong"
        }
    }

    fn context(pairs: &[(&str, &str)]) -> (MessageContext, Arc<CollectingSender>) {
        let sender = Arc::new(CollectingSender::default());
        let headers = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let context = MessageContext::new(headers, Arc::new(TransactionContext::new()), sender.clone());
        (context, sender)
    }

    #[tokio::test]
    async fn reply_goes_to_return_address_with_correlation_id() {
        let (context, sender) = context(&[
            (headers::MESSAGE_ID, "m-1"),
            (headers::RETURN_ADDRESS, "client"),
        ]);

        context.reply(&Pong).await.unwrap();

        let sent = sender.sent.lock().unwrap();
        let (destination, message) = &sent[0];
        assert_eq!(destination, &Destination::Address("client".to_string()));
        assert_eq!(message.header(headers::CORRELATION_ID), Some("m-1"));
        assert_eq!(message.message_type(), Some("Pong"));
    }

    #[tokio::test]
    async fn existing_correlation_id_flows_on() {
        let (context, sender) = context(&[
            (headers::MESSAGE_ID, "m-2"),
            (headers::CORRELATION_ID, "origin"),
        ]);

        context.send_local(&Pong).await.unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].0, Destination::Local);
        assert_eq!(sent[0].1.header(headers::CORRELATION_ID), Some("origin"));
    }

    #[tokio::test]
    async fn reply_without_return_address_fails() {
        let (context, sender) = context(&[(headers::MESSAGE_ID, "m-3")]);

        assert!(context.reply(&Pong).await.is_err());
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
