//! Handler registration and per-message activation.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    BusMessage, HandleMessages, HandlerInvoker, InvokerFactory, LogicalMessage, MessageContext,
};
use saga::{Saga, SagaDefinition};

use crate::error::Result;

/// Registry of everything that handles messages: plain handlers, closures
/// and sagas.
#[derive(Clone, Default)]
pub struct HandlerActivator {
    factories: Vec<Arc<dyn InvokerFactory>>,
}

impl HandlerActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for messages of type `M`.
    pub fn register<M, H>(&mut self, handler: H) -> &mut Self
    where
        M: BusMessage,
        H: HandleMessages<M> + 'static,
    {
        self.factories.push(Arc::new(HandlerFactory::<M, H> {
            handler: Arc::new(handler),
            _message: PhantomData,
        }));
        self
    }

    /// Registers a closure as the handler for messages of type `M`.
    pub fn register_fn<M, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        M: BusMessage,
        F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register::<M, _>(FnHandler {
            handler,
            _message: PhantomData,
        })
    }

    /// Validates a saga definition and registers its handlers.
    pub fn register_saga<S: Saga>(&mut self, definition: SagaDefinition<S>) -> Result<&mut Self> {
        self.factories.extend(definition.build()?);
        Ok(self)
    }

    /// Creates fresh invokers for every handler of `message_type`, in
    /// registration order.
    pub fn activate(&self, message_type: &str) -> Vec<Box<dyn HandlerInvoker>> {
        self.factories
            .iter()
            .filter(|f| f.message_type() == message_type)
            .map(|f| f.create())
            .collect()
    }

    /// Message types with at least one handler.
    pub fn handled_message_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.iter().map(|f| f.message_type()).collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}

struct HandlerFactory<M, H> {
    handler: Arc<H>,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> InvokerFactory for HandlerFactory<M, H>
where
    M: BusMessage,
    H: HandleMessages<M> + 'static,
{
    fn message_type(&self) -> &str {
        M::message_type()
    }

    fn create(&self) -> Box<dyn HandlerInvoker> {
        Box::new(HandlerFactory::<M, H> {
            handler: self.handler.clone(),
            _message: PhantomData,
        })
    }
}

#[async_trait]
impl<M, H> HandlerInvoker for HandlerFactory<M, H>
where
    M: BusMessage,
    H: HandleMessages<M> + 'static,
{
    fn handler_name(&self) -> &str {
        std::any::type_name::<H>()
    }

    async fn invoke(
        &mut self,
        message: &LogicalMessage,
        context: &MessageContext,
    ) -> anyhow::Result<()> {
        let typed: M = message.decode()?;
        self.handler.handle(typed, context).await
    }
}

struct FnHandler<M, F> {
    handler: F,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, F, Fut> HandleMessages<M> for FnHandler<M, F>
where
    M: BusMessage,
    F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: M, context: &MessageContext) -> anyhow::Result<()> {
        (self.handler)(message, context.clone()).await
    }
}
