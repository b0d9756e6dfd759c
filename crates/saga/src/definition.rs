//! Saga registration: which messages a saga handles and which may start it.

use std::collections::HashSet;
use std::sync::Arc;

use pipeline::{BusMessage, InvokerFactory};
use saga_storage::{CorrelationProperty, ID_PROPERTY, lookup_path};

use crate::correlation::CorrelationConfig;
use crate::error::{Result, SagaError};
use crate::invoker::{HandleFn, IdempotencyAccess, SagaInvokerFactory, SagaShared, handle_typed};
use crate::saga::{IdempotentSagaData, Saga, SagaHandler};

struct HandledMessage<S: Saga> {
    message_type: &'static str,
    handle: HandleFn<S>,
}

/// Builder that turns a saga into invoker factories for the bus.
///
/// ```ignore
/// let factories = SagaDefinition::new(OrderSaga)
///     .initiated_by::<OrderPlaced>()
///     .handles::<PaymentReceived>()
///     .idempotent()
///     .build()?;
/// ```
pub struct SagaDefinition<S: Saga> {
    saga: Arc<S>,
    handled: Vec<HandledMessage<S>>,
    initiators: HashSet<&'static str>,
    idempotency: Option<IdempotencyAccess<S::Data>>,
}

impl<S: Saga> SagaDefinition<S> {
    pub fn new(saga: S) -> Self {
        Self {
            saga: Arc::new(saga),
            handled: Vec::new(),
            initiators: HashSet::new(),
            idempotency: None,
        }
    }

    /// Handles `M` and lets it create a new instance when none matches.
    pub fn initiated_by<M>(mut self) -> Self
    where
        M: BusMessage,
        S: SagaHandler<M>,
    {
        self.initiators.insert(M::message_type());
        self.handles::<M>()
    }

    /// Handles `M` for existing instances only.
    pub fn handles<M>(mut self) -> Self
    where
        M: BusMessage,
        S: SagaHandler<M>,
    {
        if !self.handled.iter().any(|h| h.message_type == M::message_type()) {
            self.handled.push(HandledMessage {
                message_type: M::message_type(),
                handle: handle_typed::<S, M>,
            });
        }
        self
    }

    /// Skips messages the instance already handled and replays what was
    /// sent while handling them.
    pub fn idempotent(mut self) -> Self
    where
        S::Data: IdempotentSagaData,
    {
        self.idempotency = Some(IdempotencyAccess {
            ledger: <S::Data as IdempotentSagaData>::idempotency_data,
            ledger_mut: <S::Data as IdempotentSagaData>::idempotency_data_mut,
        });
        self
    }

    /// Validates the correlation declarations and creates one invoker
    /// factory per handled message type.
    ///
    /// Fails when a handled message has no correlation, or when a
    /// correlation names a property missing from the serialized default
    /// saga data.
    pub fn build(self) -> Result<Vec<Arc<dyn InvokerFactory>>> {
        let saga_type = self.saga.saga_type();

        let mut config = CorrelationConfig::new();
        self.saga.correlate_messages(&mut config);
        let correlations = config.into_correlations();

        let template = serde_json::to_value(S::Data::default())?;
        for correlation in &correlations {
            let property_name = correlation.property_name();
            if property_name != ID_PROPERTY && lookup_path(&template, property_name).is_none() {
                return Err(SagaError::UnknownCorrelationProperty {
                    saga_type: saga_type.to_string(),
                    message_type: correlation.message_type().to_string(),
                    property_name: property_name.to_string(),
                });
            }
        }

        for handled in &self.handled {
            if !correlations
                .iter()
                .any(|c| c.message_type() == handled.message_type)
            {
                return Err(SagaError::MissingCorrelation {
                    saga_type: saga_type.to_string(),
                    message_type: handled.message_type.to_string(),
                });
            }
        }

        let mut properties: Vec<CorrelationProperty> = Vec::new();
        for correlation in &correlations {
            let property = CorrelationProperty::new(saga_type, correlation.property_name());
            if !properties.contains(&property) {
                properties.push(property);
            }
        }

        tracing::debug!(
            saga_type,
            handled = self.handled.len(),
            correlations = correlations.len(),
            idempotent = self.idempotency.is_some(),
            "Saga definition built"
        );

        let shared = Arc::new(SagaShared {
            saga: self.saga,
            correlations,
            properties,
            initiators: self.initiators,
            idempotency: self.idempotency,
        });

        Ok(self
            .handled
            .into_iter()
            .map(|handled| {
                Arc::new(SagaInvokerFactory {
                    message_type: handled.message_type,
                    handle: handled.handle,
                    shared: shared.clone(),
                }) as Arc<dyn InvokerFactory>
            })
            .collect())
    }
}
