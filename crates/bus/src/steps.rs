//! Built-in steps of the default receive and send pipelines.
//!
//! Receive: deserialize, activate handlers, load saga data, dispatch.
//! Send: assign default headers, serialize, send.
//!
//! Every step exposes its name as `NAME` so integrators can inject their
//! own steps before or after it.

use std::sync::Arc;

use async_trait::async_trait;
use common::{MessageId, headers};
use pipeline::{IncomingStepContext, HandlerInvokers, Next, OutgoingStepContext, Step};
use transport::Transport;

use crate::activator::HandlerActivator;
use crate::error::BusError;
use crate::serializer::Serializer;

/// Turns the received transport message into a logical message.
pub struct DeserializeIncomingMessageStep {
    serializer: Arc<dyn Serializer>,
}

impl DeserializeIncomingMessageStep {
    pub const NAME: &'static str = "DeserializeIncomingMessageStep";

    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl Step<IncomingStepContext> for DeserializeIncomingMessageStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        let message = self.serializer.deserialize(context.transport_message())?;
        context.set_message(message);
        next.run(context).await
    }
}

/// Creates an invoker for every handler of the message's type.
pub struct ActivateHandlersStep {
    activator: Arc<HandlerActivator>,
}

impl ActivateHandlersStep {
    pub const NAME: &'static str = "ActivateHandlersStep";

    pub fn new(activator: Arc<HandlerActivator>) -> Self {
        Self { activator }
    }
}

#[async_trait]
impl Step<IncomingStepContext> for ActivateHandlersStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        let message = context
            .message()
            .ok_or_else(|| anyhow::anyhow!("no logical message; is the deserialize step missing?"))?;
        let Some(message_type) = message.message_type() else {
            return Err(BusError::MissingHeader {
                message_id: message_id_of(context),
                header: headers::MESSAGE_TYPE,
            }
            .into());
        };

        let invokers = self.activator.activate(message_type);
        tracing::debug!(
            message_type,
            handlers = invokers.len(),
            "Handlers activated"
        );
        context.set_invokers(HandlerInvokers::new(invokers));
        next.run(context).await
    }
}

/// Invokes every activated, non-skipped handler in order.
///
/// Fails when no handler was activated at all. Handlers skipped by an
/// earlier step do not count as missing.
pub struct DispatchIncomingMessageStep;

impl DispatchIncomingMessageStep {
    pub const NAME: &'static str = "DispatchIncomingMessageStep";
}

#[async_trait]
impl Step<IncomingStepContext> for DispatchIncomingMessageStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        let message_context = context.message_context();
        let message_id = message_id_of(context);

        let (Some(message), Some(invokers)) = context.message_and_invokers_mut() else {
            anyhow::bail!("message {message_id} reached dispatch without activated handlers");
        };
        if invokers.is_empty() {
            return Err(BusError::NoHandlers {
                message_id,
                message_type: message.message_type().unwrap_or_default().to_string(),
            }
            .into());
        }

        for invocation in invokers.iter_mut() {
            if invocation.is_skipped() {
                tracing::debug!(handler = invocation.handler_name(), "Handler skipped");
                continue;
            }
            tracing::debug!(handler = invocation.handler_name(), "Invoking handler");
            invocation
                .invoker_mut()
                .invoke(message, &message_context)
                .await?;
        }

        next.run(context).await
    }
}

fn message_id_of(context: &IncomingStepContext) -> String {
    context
        .transport_message()
        .message_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// Fills in message id, sent time, return and sender address, and a
/// correlation id for messages that start a conversation.
pub struct AssignDefaultHeadersStep {
    address: Option<String>,
}

impl AssignDefaultHeadersStep {
    pub const NAME: &'static str = "AssignDefaultHeadersStep";

    pub fn new(address: Option<String>) -> Self {
        Self { address }
    }
}

#[async_trait]
impl Step<OutgoingStepContext> for AssignDefaultHeadersStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut OutgoingStepContext,
        next: Next<'_, OutgoingStepContext>,
    ) -> anyhow::Result<()> {
        let message_headers = context.message_mut().headers_mut();

        let message_id = message_headers
            .entry(headers::MESSAGE_ID.to_string())
            .or_insert_with(|| MessageId::new().to_string())
            .clone();
        message_headers
            .entry(headers::CORRELATION_ID.to_string())
            .or_insert(message_id);
        message_headers
            .entry(headers::SENT_TIME.to_string())
            .or_insert_with(|| chrono::Utc::now().to_rfc3339());
        if let Some(address) = &self.address {
            message_headers
                .entry(headers::RETURN_ADDRESS.to_string())
                .or_insert_with(|| address.clone());
            message_headers.insert(headers::SENDER_ADDRESS.to_string(), address.clone());
        }

        next.run(context).await
    }
}

/// Serializes the logical message into a transport message.
pub struct SerializeOutgoingMessageStep {
    serializer: Arc<dyn Serializer>,
}

impl SerializeOutgoingMessageStep {
    pub const NAME: &'static str = "SerializeOutgoingMessageStep";

    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl Step<OutgoingStepContext> for SerializeOutgoingMessageStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut OutgoingStepContext,
        next: Next<'_, OutgoingStepContext>,
    ) -> anyhow::Result<()> {
        let transport_message = self.serializer.serialize(context.message())?;
        context.set_transport_message(transport_message);
        next.run(context).await
    }
}

/// Hands the transport message to the transport, enlisted in the current
/// transaction.
pub struct SendOutgoingMessageStep {
    transport: Arc<dyn Transport>,
}

impl SendOutgoingMessageStep {
    pub const NAME: &'static str = "SendOutgoingMessageStep";

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Step<OutgoingStepContext> for SendOutgoingMessageStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut OutgoingStepContext,
        next: Next<'_, OutgoingStepContext>,
    ) -> anyhow::Result<()> {
        let Some(transport_message) = context.take_transport_message() else {
            anyhow::bail!("no transport message; is the serialize step missing?");
        };
        self.transport
            .send(context.destination(), transport_message, context.transaction())
            .await?;
        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{LogicalMessage, invoke};
    use serde_json::json;
    use transport::{Headers, TransactionContext, TransportMessage};

    use super::*;
    use crate::serializer::JsonSerializer;
    use crate::testing::NullSender;

    fn outgoing(message_headers: Headers) -> OutgoingStepContext {
        OutgoingStepContext::new(
            LogicalMessage::new(message_headers, json!({})),
            "elsewhere",
            Arc::new(TransactionContext::new()),
        )
    }

    #[tokio::test]
    async fn default_headers_fill_gaps_only() {
        let step: Arc<dyn Step<OutgoingStepContext>> =
            Arc::new(AssignDefaultHeadersStep::new(Some("me".to_string())));

        let mut fresh = outgoing(Headers::new());
        invoke(&[step.clone()], &mut fresh).await.unwrap();
        let h = fresh.message().headers();
        assert!(h.contains_key(headers::SENT_TIME));
        assert_eq!(h.get(headers::CORRELATION_ID), h.get(headers::MESSAGE_ID));
        assert_eq!(h.get(headers::RETURN_ADDRESS).map(String::as_str), Some("me"));
        assert_eq!(h.get(headers::SENDER_ADDRESS).map(String::as_str), Some("me"));

        let mut preset = Headers::new();
        preset.insert(headers::MESSAGE_ID.to_string(), "m-1".to_string());
        preset.insert(headers::CORRELATION_ID.to_string(), "origin".to_string());
        preset.insert(headers::RETURN_ADDRESS.to_string(), "client".to_string());
        let mut replying = outgoing(preset);
        invoke(&[step], &mut replying).await.unwrap();
        let h = replying.message().headers();
        assert_eq!(h.get(headers::MESSAGE_ID).map(String::as_str), Some("m-1"));
        assert_eq!(h.get(headers::CORRELATION_ID).map(String::as_str), Some("origin"));
        assert_eq!(h.get(headers::RETURN_ADDRESS).map(String::as_str), Some("client"));
    }

    #[tokio::test]
    async fn dispatch_without_handlers_fails() {
        let steps: Vec<Arc<dyn Step<IncomingStepContext>>> = vec![
            Arc::new(DeserializeIncomingMessageStep::new(Arc::new(JsonSerializer))),
            Arc::new(ActivateHandlersStep::new(Arc::new(HandlerActivator::new()))),
            Arc::new(DispatchIncomingMessageStep),
        ];
        let mut message_headers = Headers::new();
        message_headers.insert(headers::MESSAGE_ID.to_string(), "m-9".to_string());
        message_headers.insert(headers::MESSAGE_TYPE.to_string(), "Nobody".to_string());
        let mut context = IncomingStepContext::new(
            TransportMessage::new(message_headers, b"{}".to_vec()),
            Arc::new(TransactionContext::new()),
            Arc::new(NullSender),
        );

        let err = invoke(&steps, &mut context).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BusError>(),
            Some(BusError::NoHandlers { message_id, message_type })
                if message_id == "m-9" && message_type == "Nobody"
        ));
    }

    #[tokio::test]
    async fn message_without_type_header_fails_activation() {
        let steps: Vec<Arc<dyn Step<IncomingStepContext>>> = vec![
            Arc::new(DeserializeIncomingMessageStep::new(Arc::new(JsonSerializer))),
            Arc::new(ActivateHandlersStep::new(Arc::new(HandlerActivator::new()))),
        ];
        let mut context = IncomingStepContext::new(
            TransportMessage::new(Headers::new(), b"{}".to_vec()),
            Arc::new(TransactionContext::new()),
            Arc::new(NullSender),
        );

        let err = invoke(&steps, &mut context).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BusError>(),
            Some(BusError::MissingHeader { header, .. }) if *header == headers::MESSAGE_TYPE
        ));
    }
}
