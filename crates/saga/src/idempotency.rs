//! Idempotency ledger kept inside saga data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{MessageId, headers};
use pipeline::{Destination, LogicalMessage, MessageSender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use transport::{Headers, TransactionContext};

/// A message sent while handling a message, kept for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Destination queue, or `None` for the sender's own queue.
    pub destination: Option<String>,
    pub headers: Headers,
    pub body: Value,
}

impl OutgoingMessage {
    fn from_send(destination: &Destination, message: &LogicalMessage) -> Self {
        Self {
            destination: match destination {
                Destination::Local => None,
                Destination::Address(address) => Some(address.clone()),
            },
            headers: message.headers().clone(),
            body: message.body().clone(),
        }
    }

    pub fn destination(&self) -> Destination {
        match &self.destination {
            Some(address) => Destination::Address(address.clone()),
            None => Destination::Local,
        }
    }

    pub fn to_logical(&self) -> LogicalMessage {
        LogicalMessage::new(self.headers.clone(), self.body.clone())
    }
}

/// Which message ids an idempotent saga instance already handled, and what
/// it sent while handling them.
///
/// Stored as part of the saga data, so it is persisted in the same write
/// as the state change it guards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyData {
    #[serde(default)]
    handled_message_ids: BTreeSet<String>,
    #[serde(default)]
    outgoing_messages: BTreeMap<String, Vec<OutgoingMessage>>,
}

impl IdempotencyData {
    pub fn has_already_handled(&self, message_id: &MessageId) -> bool {
        self.handled_message_ids.contains(message_id.as_str())
    }

    pub fn mark_as_handled(&mut self, message_id: &MessageId) {
        self.handled_message_ids.insert(message_id.to_string());
    }

    pub fn record_outgoing(&mut self, message_id: &MessageId, message: OutgoingMessage) {
        self.outgoing_messages
            .entry(message_id.to_string())
            .or_default()
            .push(message);
    }

    /// Messages sent while handling `message_id`, in send order.
    pub fn outgoing_messages_for(&self, message_id: &MessageId) -> &[OutgoingMessage] {
        self.outgoing_messages
            .get(message_id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn handled_count(&self) -> usize {
        self.handled_message_ids.len()
    }
}

/// Sender decorator that remembers what passes through it.
///
/// Assigns a message id to each outgoing message before forwarding, so a
/// replay sends the same identities again and receivers can deduplicate.
pub(crate) struct RecordingSender {
    inner: Arc<dyn MessageSender>,
    recorded: Mutex<Vec<OutgoingMessage>>,
}

impl RecordingSender {
    pub(crate) fn new(inner: Arc<dyn MessageSender>) -> Self {
        Self {
            inner,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn take(&self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut *self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(
        &self,
        destination: Destination,
        mut message: LogicalMessage,
        transaction: &Arc<TransactionContext>,
    ) -> anyhow::Result<()> {
        message
            .headers_mut()
            .entry(headers::MESSAGE_ID.to_string())
            .or_insert_with(|| MessageId::new().to_string());

        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OutgoingMessage::from_send(&destination, &message));

        self.inner.send(destination, message, transaction).await
    }
}
