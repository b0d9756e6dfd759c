//! Typed saga invokers: the bridge between the pipeline's handler model and
//! a `SagaHandler<M>` implementation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use pipeline::{
    BusMessage, CorrelationLookup, HandlerInvoker, InvokerFactory, LogicalMessage, MessageContext,
    SagaBinding, SagaState,
};
use saga_storage::CorrelationProperty;
use serde_json::Value;

use crate::correlation::Correlation;
use crate::error::SagaError;
use crate::idempotency::{IdempotencyData, RecordingSender};
use crate::saga::{Saga, SagaHandler, SagaInstance};

/// Decodes the message and calls the saga's handler for one message type.
pub(crate) type HandleFn<S> = for<'a> fn(
    &'a S,
    &'a mut SagaInstance<<S as Saga>::Data>,
    &'a LogicalMessage,
    &'a MessageContext,
) -> BoxFuture<'a, anyhow::Result<()>>;

pub(crate) fn handle_typed<'a, S, M>(
    saga: &'a S,
    instance: &'a mut SagaInstance<S::Data>,
    message: &'a LogicalMessage,
    context: &'a MessageContext,
) -> BoxFuture<'a, anyhow::Result<()>>
where
    S: SagaHandler<M>,
    M: BusMessage,
{
    Box::pin(async move {
        let typed: M = message.decode()?;
        saga.handle(instance, typed, context).await
    })
}

/// Accessors for the ledger inside idempotent saga data.
pub(crate) struct IdempotencyAccess<D> {
    pub(crate) ledger: fn(&D) -> &IdempotencyData,
    pub(crate) ledger_mut: fn(&mut D) -> &mut IdempotencyData,
}

impl<D> Clone for IdempotencyAccess<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for IdempotencyAccess<D> {}

/// Everything a saga's invokers share, built once per definition.
pub(crate) struct SagaShared<S: Saga> {
    pub(crate) saga: Arc<S>,
    pub(crate) correlations: Vec<Correlation>,
    pub(crate) properties: Vec<CorrelationProperty>,
    pub(crate) initiators: HashSet<&'static str>,
    pub(crate) idempotency: Option<IdempotencyAccess<S::Data>>,
}

pub(crate) struct SagaInvokerFactory<S: Saga> {
    pub(crate) message_type: &'static str,
    pub(crate) handle: HandleFn<S>,
    pub(crate) shared: Arc<SagaShared<S>>,
}

impl<S: Saga> InvokerFactory for SagaInvokerFactory<S> {
    fn message_type(&self) -> &str {
        self.message_type
    }

    fn create(&self) -> Box<dyn HandlerInvoker> {
        Box::new(SagaInvoker {
            handler_name: format!("{}/{}", self.shared.saga.saga_type(), self.message_type),
            message_type: self.message_type,
            handle: self.handle,
            shared: self.shared.clone(),
            state: None,
        })
    }
}

/// Runs one saga handler for one message against the attached instance.
pub(crate) struct SagaInvoker<S: Saga> {
    handler_name: String,
    message_type: &'static str,
    handle: HandleFn<S>,
    shared: Arc<SagaShared<S>>,
    state: Option<SagaState>,
}

#[async_trait]
impl<S: Saga> HandlerInvoker for SagaInvoker<S> {
    fn handler_name(&self) -> &str {
        &self.handler_name
    }

    fn saga_binding(&mut self) -> Option<&mut dyn SagaBinding> {
        Some(self)
    }

    async fn invoke(
        &mut self,
        message: &LogicalMessage,
        context: &MessageContext,
    ) -> anyhow::Result<()> {
        let saga_type = self.shared.saga.saga_type();
        let Some(state) = self.state.as_mut() else {
            return Err(SagaError::NoInstanceAttached(saga_type.to_string()).into());
        };

        let data: S::Data = serde_json::from_value(state.data.clone())?;
        let mut instance = SagaInstance::new(state.id, state.revision, state.is_new, data);
        let saga = self.shared.saga.as_ref();

        let ledger_and_id = match self.shared.idempotency {
            Some(access) => {
                let message_id = message.message_id().ok_or_else(|| SagaError::MissingMessageId {
                    saga_type: saga_type.to_string(),
                    message_type: self.message_type.to_string(),
                })?;
                Some((access, message_id))
            }
            None => None,
        };
        match ledger_and_id {
            Some((access, message_id)) => {
                let ledger = (access.ledger)(instance.data());
                if ledger.has_already_handled(&message_id) {
                    for outgoing in ledger.outgoing_messages_for(&message_id) {
                        context
                            .send_logical(outgoing.destination(), outgoing.to_logical())
                            .await?;
                    }
                    tracing::debug!(
                        saga_type,
                        saga_id = %state.id,
                        message_id = %message_id,
                        replayed = ledger.outgoing_messages_for(&message_id).len(),
                        "Message already handled by saga instance"
                    );
                    metrics::counter!("saga_duplicate_messages_total", "saga_type" => saga_type)
                        .increment(1);
                    state.unchanged = true;
                    state.invoked = true;
                    return Ok(());
                }

                let recorder = Arc::new(RecordingSender::new(context.sender().clone()));
                let recording = context.with_sender(recorder.clone());
                (self.handle)(saga, &mut instance, message, &recording).await?;

                let ledger = (access.ledger_mut)(instance.data_mut());
                ledger.mark_as_handled(&message_id);
                for outgoing in recorder.take() {
                    ledger.record_outgoing(&message_id, outgoing);
                }
                state.unchanged = false;
            }
            None => {
                (self.handle)(saga, &mut instance, message, context).await?;
                state.unchanged = instance.is_unchanged();
            }
        }

        state.completed = instance.is_completed();
        state.data = serde_json::to_value(&instance.data)?;
        state.invoked = true;
        Ok(())
    }
}

impl<S: Saga> SagaBinding for SagaInvoker<S> {
    fn saga_type(&self) -> &str {
        self.shared.saga.saga_type()
    }

    fn correlation_lookups(&self, message: &LogicalMessage) -> anyhow::Result<Vec<CorrelationLookup>> {
        let mut lookups = Vec::new();
        for correlation in self
            .shared
            .correlations
            .iter()
            .filter(|c| c.message_type() == self.message_type)
        {
            if let Some(lookup) = correlation.lookup(message)? {
                lookups.push(lookup);
            }
        }
        Ok(lookups)
    }

    fn correlation_properties(&self) -> Vec<CorrelationProperty> {
        self.shared.properties.clone()
    }

    fn is_initiated_by(&self, message_type: &str) -> bool {
        self.shared.initiators.contains(message_type)
    }

    fn new_data(&self) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(S::Data::default())?)
    }

    fn attach(&mut self, state: SagaState) {
        self.state = Some(state);
    }

    fn detach(&mut self) -> Option<SagaState> {
        self.state.take()
    }
}
