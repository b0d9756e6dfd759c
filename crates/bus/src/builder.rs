//! Bus configuration and startup.

use std::future::Future;
use std::sync::Arc;

use pipeline::{BusMessage, DefaultPipeline, HandleMessages, MessageContext, Pipeline};
use saga::{LoadSagaDataStep, Saga, SagaDefinition};
use saga_storage::{InMemorySagaStorage, SagaStorage};
use transport::Transport;

use crate::activator::HandlerActivator;
use crate::bus::{Bus, BusSender};
use crate::config::BusOptions;
use crate::dispatcher::Dispatcher;
use crate::error::{BusError, Result};
use crate::serializer::{JsonSerializer, Serializer};
use crate::steps::{
    ActivateHandlersStep, AssignDefaultHeadersStep, DeserializeIncomingMessageStep,
    DispatchIncomingMessageStep, SendOutgoingMessageStep, SerializeOutgoingMessageStep,
};
use crate::worker::WorkerPool;

type PipelineDecorator = Box<dyn FnOnce(Box<dyn Pipeline>) -> Box<dyn Pipeline> + Send>;

/// Collects transport, storage, handlers and pipeline decorators, then
/// starts a [`Bus`].
///
/// The default pipelines are
///
/// ```text
/// receive: DeserializeIncomingMessageStep, ActivateHandlersStep,
///          LoadSagaDataStep, DispatchIncomingMessageStep
/// send:    AssignDefaultHeadersStep, SerializeOutgoingMessageStep,
///          SendOutgoingMessageStep
/// ```
///
/// Decorators registered with [`decorate_pipeline`](Self::decorate_pipeline)
/// wrap that pipeline in registration order, typically with a
/// [`PipelineStepInjector`](pipeline::PipelineStepInjector).
pub struct BusBuilder {
    transport: Option<Arc<dyn Transport>>,
    saga_storage: Option<Arc<dyn SagaStorage>>,
    serializer: Arc<dyn Serializer>,
    options: BusOptions,
    activator: HandlerActivator,
    decorators: Vec<PipelineDecorator>,
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            saga_storage: None,
            serializer: Arc::new(JsonSerializer),
            options: BusOptions::default(),
            activator: HandlerActivator::new(),
            decorators: Vec::new(),
        }
    }
}

impl BusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Saga storage; sagas use an in-memory storage when none is given.
    pub fn with_saga_storage(mut self, storage: Arc<dyn SagaStorage>) -> Self {
        self.saga_storage = Some(storage);
        self
    }

    pub fn with_serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn with_options(mut self, options: BusOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a handler for messages of type `M`.
    pub fn handle<M, H>(mut self, handler: H) -> Self
    where
        M: BusMessage,
        H: HandleMessages<M> + 'static,
    {
        self.activator.register::<M, H>(handler);
        self
    }

    /// Registers a closure handler for messages of type `M`.
    pub fn handle_fn<M, F, Fut>(mut self, handler: F) -> Self
    where
        M: BusMessage,
        F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.activator.register_fn(handler);
        self
    }

    /// Validates and registers a saga.
    pub fn saga<S: Saga>(mut self, definition: SagaDefinition<S>) -> Result<Self> {
        self.activator.register_saga(definition)?;
        Ok(self)
    }

    /// Wraps the pipeline. Decorators apply in registration order, so a
    /// later decorator may anchor on steps an earlier one injected.
    pub fn decorate_pipeline<F>(mut self, decorate: F) -> Self
    where
        F: FnOnce(Box<dyn Pipeline>) -> Box<dyn Pipeline> + Send + 'static,
    {
        self.decorators.push(Box::new(decorate));
        self
    }

    /// Resolves the pipelines, creates the input queue and spawns the
    /// workers.
    ///
    /// Fails without starting anything when the pipeline cannot be resolved,
    /// e.g. an injection names an anchor that does not exist. A send-only
    /// transport starts no workers.
    pub async fn start(self) -> Result<Bus> {
        let transport = self.transport.ok_or(BusError::MissingTransport)?;
        let address = transport.address().map(str::to_string);
        let storage = self
            .saga_storage
            .unwrap_or_else(|| Arc::new(InMemorySagaStorage::new()));
        let activator = Arc::new(self.activator);

        let base = DefaultPipeline::new()
            .on_receive(Arc::new(DeserializeIncomingMessageStep::new(
                self.serializer.clone(),
            )))
            .on_receive(Arc::new(ActivateHandlersStep::new(activator.clone())))
            .on_receive(Arc::new(LoadSagaDataStep::new(
                storage,
                self.options.unmatched_saga_policy,
            )))
            .on_receive(Arc::new(DispatchIncomingMessageStep))
            .on_send(Arc::new(AssignDefaultHeadersStep::new(address.clone())))
            .on_send(Arc::new(SerializeOutgoingMessageStep::new(
                self.serializer.clone(),
            )))
            .on_send(Arc::new(SendOutgoingMessageStep::new(transport.clone())));

        let pipeline = self
            .decorators
            .into_iter()
            .fold(Box::new(base) as Box<dyn Pipeline>, |pipeline, decorate| {
                decorate(pipeline)
            });
        let receive = pipeline.receive_pipeline()?;
        let send = pipeline.send_pipeline()?;

        if let Some(address) = &address {
            transport.create_queue(address).await?;
        }

        let sender = Arc::new(BusSender::new(send, address.clone()));
        let dispatcher = Arc::new(Dispatcher::new(transport.clone(), receive, sender.clone()));
        tracing::info!(
            address = address.as_deref().unwrap_or("<send-only>"),
            receive_steps = ?dispatcher.step_names(),
            handled_types = ?activator.handled_message_types(),
            "Bus starting"
        );

        let options = match address {
            Some(_) => self.options,
            None => self.options.with_workers(0),
        };
        let workers = WorkerPool::spawn(dispatcher.clone(), &options);

        Ok(Bus::new(transport, sender, dispatcher, workers))
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{
        IncomingStepContext, Next, PipelineError, PipelineStepInjector, RelativePosition, Step,
    };
    use transport::{InMemNetwork, InMemoryTransport};

    use super::*;

    struct Audit;

    #[async_trait::async_trait]
    impl Step<IncomingStepContext> for Audit {
        fn name(&self) -> &'static str {
            "Audit"
        }

        async fn process(
            &self,
            context: &mut IncomingStepContext,
            next: Next<'_, IncomingStepContext>,
        ) -> anyhow::Result<()> {
            next.run(context).await
        }
    }

    fn idle_options() -> BusOptions {
        BusOptions::default().with_workers(0)
    }

    #[tokio::test]
    async fn default_pipelines_in_order() {
        let bus = BusBuilder::new()
            .with_transport(InMemoryTransport::new(InMemNetwork::new(), "input"))
            .with_options(idle_options())
            .start()
            .await
            .unwrap();

        assert_eq!(
            bus.dispatcher().step_names(),
            [
                DeserializeIncomingMessageStep::NAME,
                ActivateHandlersStep::NAME,
                LoadSagaDataStep::NAME,
                DispatchIncomingMessageStep::NAME,
            ]
        );
        assert_eq!(
            bus.send_step_names(),
            [
                AssignDefaultHeadersStep::NAME,
                SerializeOutgoingMessageStep::NAME,
                SendOutgoingMessageStep::NAME,
            ]
        );
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn injected_step_lands_next_to_anchor() {
        let bus = BusBuilder::new()
            .with_transport(InMemoryTransport::new(InMemNetwork::new(), "input"))
            .with_options(idle_options())
            .decorate_pipeline(|pipeline| {
                Box::new(PipelineStepInjector::new(pipeline).on_receive(
                    Arc::new(Audit),
                    RelativePosition::After,
                    DeserializeIncomingMessageStep::NAME,
                ))
            })
            .start()
            .await
            .unwrap();

        assert_eq!(bus.dispatcher().step_names()[..3], [
            DeserializeIncomingMessageStep::NAME,
            "Audit",
            ActivateHandlersStep::NAME,
        ]);
    }

    #[tokio::test]
    async fn unknown_anchor_fails_start_before_creating_queue() {
        let network = InMemNetwork::new();
        let result = BusBuilder::new()
            .with_transport(InMemoryTransport::new(network.clone(), "input"))
            .with_options(idle_options())
            .decorate_pipeline(|pipeline| {
                Box::new(PipelineStepInjector::new(pipeline).on_receive(
                    Arc::new(Audit),
                    RelativePosition::Before,
                    "NoSuchStep",
                ))
            })
            .start()
            .await;

        assert!(matches!(
            result,
            Err(BusError::Pipeline(PipelineError::AnchorNotFound {
                anchor: "NoSuchStep",
                ..
            }))
        ));
        assert!(!network.has_queue("input").await);
    }

    #[tokio::test]
    async fn missing_transport_is_rejected() {
        let result = BusBuilder::new().start().await;
        assert!(matches!(result, Err(BusError::MissingTransport)));
    }
}
