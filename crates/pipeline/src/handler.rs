//! Handler model: what the activation step produces and the dispatch step runs.

use async_trait::async_trait;
use common::{Revision, SagaId};
use saga_storage::CorrelationProperty;
use serde_json::Value;

use crate::message::{BusMessage, LogicalMessage};
use crate::sender::MessageContext;

/// Handles messages of type `M`.
#[async_trait]
pub trait HandleMessages<M: BusMessage>: Send + Sync {
    async fn handle(&self, message: M, context: &MessageContext) -> anyhow::Result<()>;
}

/// One handler, ready to be invoked for the current message.
#[async_trait]
pub trait HandlerInvoker: Send + Sync {
    /// Name used in logs.
    fn handler_name(&self) -> &str;

    /// Saga plumbing, for invokers that run a saga handler.
    fn saga_binding(&mut self) -> Option<&mut dyn SagaBinding> {
        None
    }

    /// Invokes the handler with the current message.
    async fn invoke(
        &mut self,
        message: &LogicalMessage,
        context: &MessageContext,
    ) -> anyhow::Result<()>;
}

/// Creates invokers for one message type.
///
/// Registered with a handler activator; called once per received message.
pub trait InvokerFactory: Send + Sync {
    /// Message type this factory handles.
    fn message_type(&self) -> &str;

    fn create(&self) -> Box<dyn HandlerInvoker>;
}

/// A lookup value computed from a message for one correlation property.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationLookup {
    /// Saga data property to match.
    pub property_name: String,
    /// Normalized key used to query storage.
    pub value: String,
    /// The value as read from the message, written into new instances.
    pub raw: Value,
}

/// Saga instance state carried by a saga invoker during one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaState {
    pub id: SagaId,
    pub revision: Revision,
    pub data: Value,
    /// Created for this message, not yet persisted.
    pub is_new: bool,
    /// The handler asked for the instance to be deleted.
    pub completed: bool,
    /// The handler asked for the instance not to be written.
    pub unchanged: bool,
    /// The invoker ran for this message. Instances whose invoker never ran
    /// are not persisted.
    pub invoked: bool,
}

impl SagaState {
    /// State for a fresh instance at revision 0.
    pub fn new_instance(id: SagaId, data: Value) -> Self {
        Self {
            id,
            revision: Revision::initial(),
            data,
            is_new: true,
            completed: false,
            unchanged: false,
            invoked: false,
        }
    }

    /// State for an instance loaded from storage.
    pub fn loaded(id: SagaId, revision: Revision, data: Value) -> Self {
        Self {
            id,
            revision,
            data,
            is_new: false,
            completed: false,
            unchanged: false,
            invoked: false,
        }
    }
}

/// What the saga data step needs to know about a saga invoker.
pub trait SagaBinding: Send + Sync {
    /// Saga data type name used as the storage key.
    fn saga_type(&self) -> &str;

    /// Lookup values for every correlation declared for this message.
    fn correlation_lookups(&self, message: &LogicalMessage) -> anyhow::Result<Vec<CorrelationLookup>>;

    /// Every property the saga correlates on, for storage indexing.
    fn correlation_properties(&self) -> Vec<CorrelationProperty>;

    /// True if this message type may create a new instance.
    fn is_initiated_by(&self, message_type: &str) -> bool;

    /// Serialized default data for a new instance.
    fn new_data(&self) -> anyhow::Result<Value>;

    /// Hands the loaded or created instance to the invoker.
    fn attach(&mut self, state: SagaState);

    /// Takes the instance back after the handler ran.
    fn detach(&mut self) -> Option<SagaState>;
}

/// An activated invoker and whether some step decided to skip it.
pub struct HandlerInvocation {
    invoker: Box<dyn HandlerInvoker>,
    skipped: bool,
}

impl HandlerInvocation {
    pub fn invoker(&self) -> &dyn HandlerInvoker {
        self.invoker.as_ref()
    }

    pub fn invoker_mut(&mut self) -> &mut dyn HandlerInvoker {
        self.invoker.as_mut()
    }

    pub fn handler_name(&self) -> &str {
        self.invoker.handler_name()
    }

    /// Keeps the dispatch step from invoking this handler.
    pub fn skip(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }
}

/// The invokers activated for one message, in activation order.
#[derive(Default)]
pub struct HandlerInvokers {
    invocations: Vec<HandlerInvocation>,
}

impl HandlerInvokers {
    pub fn new(invokers: Vec<Box<dyn HandlerInvoker>>) -> Self {
        Self {
            invocations: invokers
                .into_iter()
                .map(|invoker| HandlerInvocation {
                    invoker,
                    skipped: false,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    /// Number of invokers not marked as skipped.
    pub fn active_count(&self) -> usize {
        self.invocations.iter().filter(|i| !i.skipped).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerInvocation> {
        self.invocations.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut HandlerInvocation> {
        self.invocations.iter_mut()
    }
}
