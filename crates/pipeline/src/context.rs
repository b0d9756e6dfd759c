//! Contexts passed through the incoming and outgoing pipelines.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use transport::{TransactionContext, TransportMessage};

use crate::handler::HandlerInvokers;
use crate::message::LogicalMessage;
use crate::sender::{MessageContext, MessageSender};

/// Typed scratch space shared by the steps of one pipeline run.
#[derive(Default)]
pub struct Items {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Items {
    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Returns the value under `key` if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns the value under `key` mutably if it has type `T`.
    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes and returns the value under `key` if it has type `T`.
    pub fn remove<T: Any + Send + Sync>(&mut self, key: &str) -> Option<T> {
        match self.values.remove(key)?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.values.insert(key.to_string(), other);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// State of one received message as it travels the receive pipeline.
///
/// Steps fill it in progressively: the deserialize step sets the logical
/// message, the activation step sets the handler invokers.
pub struct IncomingStepContext {
    transport_message: TransportMessage,
    transaction: Arc<TransactionContext>,
    sender: Arc<dyn MessageSender>,
    message: Option<LogicalMessage>,
    invokers: Option<HandlerInvokers>,
    items: Items,
}

impl IncomingStepContext {
    pub fn new(
        transport_message: TransportMessage,
        transaction: Arc<TransactionContext>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            transport_message,
            transaction,
            sender,
            message: None,
            invokers: None,
            items: Items::default(),
        }
    }

    pub fn transport_message(&self) -> &TransportMessage {
        &self.transport_message
    }

    pub fn transaction(&self) -> &Arc<TransactionContext> {
        &self.transaction
    }

    pub fn sender(&self) -> &Arc<dyn MessageSender> {
        &self.sender
    }

    /// Returns the deserialized message, once the deserialize step ran.
    pub fn message(&self) -> Option<&LogicalMessage> {
        self.message.as_ref()
    }

    pub fn set_message(&mut self, message: LogicalMessage) {
        self.message = Some(message);
    }

    /// Returns the activated invokers, once the activation step ran.
    pub fn invokers(&self) -> Option<&HandlerInvokers> {
        self.invokers.as_ref()
    }

    pub fn invokers_mut(&mut self) -> Option<&mut HandlerInvokers> {
        self.invokers.as_mut()
    }

    pub fn set_invokers(&mut self, invokers: HandlerInvokers) {
        self.invokers = Some(invokers);
    }

    /// Splits the borrow so a step can walk the invokers while reading the
    /// message.
    pub fn message_and_invokers_mut(
        &mut self,
    ) -> (Option<&LogicalMessage>, Option<&mut HandlerInvokers>) {
        (self.message.as_ref(), self.invokers.as_mut())
    }

    pub fn items(&self) -> &Items {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Items {
        &mut self.items
    }

    /// Builds the context handlers use to send follow-up messages.
    pub fn message_context(&self) -> MessageContext {
        let headers = self
            .message
            .as_ref()
            .map(|m| m.headers().clone())
            .unwrap_or_else(|| self.transport_message.headers().clone());
        MessageContext::new(headers, self.transaction.clone(), self.sender.clone())
    }
}

/// State of one outgoing message as it travels the send pipeline.
pub struct OutgoingStepContext {
    message: LogicalMessage,
    destination: String,
    transaction: Arc<TransactionContext>,
    transport_message: Option<TransportMessage>,
    items: Items,
}

impl OutgoingStepContext {
    pub fn new(
        message: LogicalMessage,
        destination: impl Into<String>,
        transaction: Arc<TransactionContext>,
    ) -> Self {
        Self {
            message,
            destination: destination.into(),
            transaction,
            transport_message: None,
            items: Items::default(),
        }
    }

    pub fn message(&self) -> &LogicalMessage {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut LogicalMessage {
        &mut self.message
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn transaction(&self) -> &Arc<TransactionContext> {
        &self.transaction
    }

    /// Returns the serialized message, once the serialize step ran.
    pub fn transport_message(&self) -> Option<&TransportMessage> {
        self.transport_message.as_ref()
    }

    pub fn set_transport_message(&mut self, message: TransportMessage) {
        self.transport_message = Some(message);
    }

    pub fn take_transport_message(&mut self) -> Option<TransportMessage> {
        self.transport_message.take()
    }

    pub fn items(&self) -> &Items {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Items {
        &mut self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_are_typed() {
        let mut items = Items::default();
        items.insert("count", 3_u32);

        assert_eq!(items.get::<u32>("count"), Some(&3));
        assert!(items.get::<String>("count").is_none());

        *items.get_mut::<u32>("count").unwrap() += 1;
        assert!(items.remove::<String>("count").is_none());
        assert_eq!(items.remove::<u32>("count"), Some(4));
        assert!(!items.contains("count"));
    }
}
