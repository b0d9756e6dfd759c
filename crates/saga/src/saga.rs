use async_trait::async_trait;
use common::{Revision, SagaId};
use pipeline::{BusMessage, MessageContext};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::correlation::CorrelationConfig;
use crate::idempotency::IdempotencyData;

/// Durable state of a saga. Any serializable type with a default value.
pub trait SagaData: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl<T> SagaData for T where T: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

/// Saga data that carries an idempotency ledger.
pub trait IdempotentSagaData: SagaData {
    fn idempotency_data(&self) -> &IdempotencyData;

    fn idempotency_data_mut(&mut self) -> &mut IdempotencyData;
}

/// A stateful workflow whose instances are found by correlation.
pub trait Saga: Send + Sync + 'static {
    type Data: SagaData;

    /// Storage key of the saga data type, e.g. "OrderSagaData".
    fn saga_type(&self) -> &'static str;

    /// Declares how each handled message maps to a saga data property.
    fn correlate_messages(&self, config: &mut CorrelationConfig<Self::Data>);
}

/// A saga's handler for messages of type `M`.
#[async_trait]
pub trait SagaHandler<M: BusMessage>: Saga {
    async fn handle(
        &self,
        instance: &mut SagaInstance<Self::Data>,
        message: M,
        context: &MessageContext,
    ) -> anyhow::Result<()>;
}

/// The instance a saga handler works on.
#[derive(Debug)]
pub struct SagaInstance<D> {
    id: SagaId,
    revision: Revision,
    is_new: bool,
    completed: bool,
    unchanged: bool,
    pub(crate) data: D,
}

impl<D: SagaData> SagaInstance<D> {
    pub(crate) fn new(id: SagaId, revision: Revision, is_new: bool, data: D) -> Self {
        Self {
            id,
            revision,
            is_new,
            completed: false,
            unchanged: false,
            data,
        }
    }

    pub fn id(&self) -> SagaId {
        self.id
    }

    /// Revision the instance was loaded at; 0 for a new instance.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// True if the instance was created for the current message.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    /// Ends the saga: the instance is deleted after the handler returns.
    pub fn mark_as_complete(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Skips writing the instance after the handler returns.
    pub fn mark_as_unchanged(&mut self) {
        self.unchanged = true;
    }

    pub fn is_unchanged(&self) -> bool {
        self.unchanged
    }
}
