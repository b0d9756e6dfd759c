//! End-to-end dispatch through a bus started without workers, stepped by
//! hand so every transaction boundary is observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bus::{Bus, BusBuilder, BusError, BusOptions, Dispatched, DeserializeIncomingMessageStep};
use common::headers;
use pipeline::{
    BusMessage, CreateScopeStep, IncomingStepContext, MessageContext, Next, PipelineStepInjector,
    RelativePosition, SCOPE_ITEM, ScopeProvider, Step,
};
use serde::{Deserialize, Serialize};
use transport::{InMemNetwork, InMemoryTransport, TransactionOutcome};

#[derive(Serialize, Deserialize)]
struct PlaceOrder {
    order: u32,
}

impl BusMessage for PlaceOrder {
    fn message_type() -> &'static str {
        "PlaceOrder"
    }
}

#[derive(Serialize, Deserialize)]
struct OrderPlaced {
    order: u32,
}

impl BusMessage for OrderPlaced {
    fn message_type() -> &'static str {
        "OrderPlaced"
    }
}

fn stepped() -> BusOptions {
    BusOptions::default().with_workers(0)
}

async fn start(network: &InMemNetwork, builder: BusBuilder) -> Bus {
    builder
        .with_transport(InMemoryTransport::new(network.clone(), "orders"))
        .with_options(stepped())
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn handler_sends_are_delivered_only_when_the_message_commits() {
    let network = InMemNetwork::new();
    network.create_queue("billing").await;
    let attempts = Arc::new(AtomicUsize::new(0));

    let bus = start(
        &network,
        BusBuilder::new().handle_fn({
            let attempts = attempts.clone();
            move |message: PlaceOrder, context: MessageContext| {
                let attempts = attempts.clone();
                async move {
                    context
                        .send("billing", &OrderPlaced {
                            order: message.order,
                        })
                        .await?;
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("first attempt fails after sending");
                    }
                    Ok::<_, anyhow::Error>(())
                }
            }
        }),
    )
    .await;

    bus.send_local(&PlaceOrder { order: 42 }).await.unwrap();
    let original = network.count("orders").await;
    assert_eq!(original, 1);

    let failed = bus.dispatcher().process_next().await;
    assert!(matches!(failed, Err(BusError::Dispatch { .. })));
    assert_eq!(network.count("billing").await, 0);
    assert_eq!(network.count("orders").await, 1);

    let message_id = match bus.dispatcher().process_next().await.unwrap() {
        Dispatched::Committed { message_id } => message_id,
        other => panic!("expected a committed message, got {other:?}"),
    };
    assert_eq!(network.count("orders").await, 0);

    let forwarded = network.get_next("billing").await.unwrap().unwrap();
    assert_eq!(forwarded.header(headers::MESSAGE_TYPE), Some("OrderPlaced"));
    assert_eq!(
        forwarded.header(headers::CORRELATION_ID),
        Some(message_id.as_str())
    );
    assert_eq!(forwarded.header(headers::RETURN_ADDRESS), Some("orders"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reply_goes_to_the_return_address() {
    let network = InMemNetwork::new();
    let placed = Arc::new(Mutex::new(Vec::new()));

    let bus = start(
        &network,
        BusBuilder::new()
            .handle_fn(|message: PlaceOrder, context: MessageContext| async move {
                context
                    .reply(&OrderPlaced {
                        order: message.order,
                    })
                    .await
            })
            .handle_fn({
                let placed = placed.clone();
                move |message: OrderPlaced, _context: MessageContext| {
                    let placed = placed.clone();
                    async move {
                        placed.lock().unwrap().push(message.order);
                        Ok::<_, anyhow::Error>(())
                    }
                }
            }),
    )
    .await;

    bus.send_local(&PlaceOrder { order: 7 }).await.unwrap();

    assert!(matches!(
        bus.dispatcher().process_next().await.unwrap(),
        Dispatched::Committed { .. }
    ));
    assert!(matches!(
        bus.dispatcher().process_next().await.unwrap(),
        Dispatched::Committed { .. }
    ));
    assert_eq!(bus.dispatcher().process_next().await.unwrap(), Dispatched::Idle);
    assert_eq!(*placed.lock().unwrap(), [7]);
}

#[tokio::test]
async fn message_without_handler_is_left_for_redelivery() {
    let network = InMemNetwork::new();
    let bus = start(&network, BusBuilder::new()).await;

    bus.send_local(&PlaceOrder { order: 1 }).await.unwrap();

    let source = match bus.dispatcher().process_next().await.unwrap_err() {
        BusError::Dispatch { source, .. } => source,
        other => panic!("expected a dispatch error, got {other:?}"),
    };
    assert!(matches!(
        source.downcast_ref::<BusError>(),
        Some(BusError::NoHandlers { message_type, .. }) if message_type == "PlaceOrder"
    ));
    assert_eq!(network.count("orders").await, 1);
}

#[tokio::test]
async fn send_only_bus_cannot_send_local() {
    let network = InMemNetwork::new();
    network.create_queue("orders").await;
    let bus = BusBuilder::new()
        .with_transport(InMemoryTransport::send_only(network.clone()))
        .start()
        .await
        .unwrap();

    assert_eq!(bus.address(), None);
    bus.send("orders", &PlaceOrder { order: 3 }).await.unwrap();
    assert_eq!(network.count("orders").await, 1);

    let err = bus.send_local(&PlaceOrder { order: 4 }).await.unwrap_err();
    assert!(matches!(err, BusError::SendOnly));
    bus.shutdown().await;
}

/// A per-message unit of work, standing in for a dependency container scope.
struct UnitOfWork {
    number: usize,
}

#[derive(Default)]
struct UnitsOfWork {
    created: AtomicUsize,
    released: Mutex<Vec<(usize, TransactionOutcome)>>,
}

#[async_trait]
impl ScopeProvider for UnitsOfWork {
    type Scope = UnitOfWork;

    async fn create_scope(&self) -> anyhow::Result<UnitOfWork> {
        let number = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UnitOfWork { number })
    }

    async fn release_scope(
        &self,
        scope: Arc<UnitOfWork>,
        outcome: TransactionOutcome,
    ) -> anyhow::Result<()> {
        self.released.lock().unwrap().push((scope.number, outcome));
        Ok(())
    }
}

/// Reads the scope an earlier step opened, as an integrator step would.
struct ScopeReader {
    seen: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Step<IncomingStepContext> for ScopeReader {
    fn name(&self) -> &'static str {
        "ScopeReader"
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        let scope = context
            .transaction()
            .load::<UnitOfWork>(SCOPE_ITEM)
            .ok_or_else(|| anyhow::anyhow!("no scope in transaction"))?;
        self.seen.lock().unwrap().push(scope.number);
        next.run(context).await
    }
}

#[tokio::test]
async fn injected_steps_share_a_scope_released_on_dispose() {
    let network = InMemNetwork::new();
    let provider = Arc::new(UnitsOfWork::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handled_in = Arc::new(Mutex::new(Vec::new()));

    let bus = start(
        &network,
        BusBuilder::new()
            .handle_fn({
                let handled_in = handled_in.clone();
                move |_: PlaceOrder, context: MessageContext| {
                    let handled_in = handled_in.clone();
                    async move {
                        let scope = context
                            .transaction()
                            .load::<UnitOfWork>(SCOPE_ITEM)
                            .ok_or_else(|| anyhow::anyhow!("handler sees no scope"))?;
                        handled_in.lock().unwrap().push(scope.number);
                        Ok::<_, anyhow::Error>(())
                    }
                }
            })
            .decorate_pipeline({
                let provider = provider.clone();
                move |pipeline| {
                    Box::new(PipelineStepInjector::new(pipeline).on_receive(
                        Arc::new(CreateScopeStep::new(provider)),
                        RelativePosition::After,
                        DeserializeIncomingMessageStep::NAME,
                    ))
                }
            })
            .decorate_pipeline({
                let seen = seen.clone();
                move |pipeline| {
                    Box::new(PipelineStepInjector::new(pipeline).on_receive(
                        Arc::new(ScopeReader { seen }),
                        RelativePosition::After,
                        CreateScopeStep::<UnitsOfWork>::NAME,
                    ))
                }
            }),
    )
    .await;

    assert_eq!(
        bus.dispatcher().step_names()[..3],
        [
            DeserializeIncomingMessageStep::NAME,
            CreateScopeStep::<UnitsOfWork>::NAME,
            "ScopeReader",
        ]
    );

    bus.send_local(&PlaceOrder { order: 1 }).await.unwrap();
    bus.send_local(&PlaceOrder { order: 2 }).await.unwrap();
    bus.dispatcher().process_next().await.unwrap();
    bus.dispatcher().process_next().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), [1, 2]);
    assert_eq!(*handled_in.lock().unwrap(), [1, 2]);
    assert_eq!(
        *provider.released.lock().unwrap(),
        [
            (1, TransactionOutcome::Committed),
            (2, TransactionOutcome::Committed)
        ]
    );
}
