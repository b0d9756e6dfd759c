//! Integration tests for saga correlation and persistence.

use std::sync::Arc;

use async_trait::async_trait;
use common::{SagaId, headers};
use pipeline::{
    BusMessage, Destination, HandlerInvokers, IncomingStepContext, InvokerFactory, LogicalMessage,
    MessageContext, MessageSender, Next, Step, invoke,
};
use saga::{
    CorrelationConfig, LoadSagaDataStep, Saga, SagaDefinition, SagaHandler, SagaInstance,
    UnmatchedSagaPolicy,
};
use saga_storage::{
    InMemorySagaStorage, PersistedSagas, SagaStorage, SagaStorageError, SagaStorageTap,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Barrier;
use transport::{Headers, TransactionContext, TransportMessage};

#[derive(Serialize, Deserialize)]
struct ShipmentRequested {
    shipment: String,
}

impl BusMessage for ShipmentRequested {
    fn message_type() -> &'static str {
        "ShipmentRequested"
    }
}

#[derive(Serialize, Deserialize)]
struct ParcelScanned {
    location: String,
}

impl BusMessage for ParcelScanned {
    fn message_type() -> &'static str {
        "ParcelScanned"
    }
}

#[derive(Serialize, Deserialize)]
struct ShipmentCancelled;

impl BusMessage for ShipmentCancelled {
    fn message_type() -> &'static str {
        "ShipmentCancelled"
    }
}

#[derive(Default, Serialize, Deserialize)]
struct ShipmentData {
    shipment: String,
    requests: u32,
    scans: Vec<String>,
}

struct ShipmentSaga;

impl Saga for ShipmentSaga {
    type Data = ShipmentData;

    fn saga_type(&self) -> &'static str {
        "ShipmentData"
    }

    fn correlate_messages(&self, config: &mut CorrelationConfig<ShipmentData>) {
        config
            .correlate(|m: &ShipmentRequested| m.shipment.clone(), "shipment")
            .correlate_header::<ParcelScanned>("shipment-ref", "shipment")
            .correlate_header::<ShipmentCancelled>("saga-id", "id");
    }
}

#[async_trait]
impl SagaHandler<ShipmentRequested> for ShipmentSaga {
    async fn handle(
        &self,
        instance: &mut SagaInstance<ShipmentData>,
        _message: ShipmentRequested,
        _context: &MessageContext,
    ) -> anyhow::Result<()> {
        instance.data_mut().requests += 1;
        Ok(())
    }
}

#[async_trait]
impl SagaHandler<ParcelScanned> for ShipmentSaga {
    async fn handle(
        &self,
        instance: &mut SagaInstance<ShipmentData>,
        message: ParcelScanned,
        _context: &MessageContext,
    ) -> anyhow::Result<()> {
        instance.data_mut().scans.push(message.location);
        Ok(())
    }
}

#[async_trait]
impl SagaHandler<ShipmentCancelled> for ShipmentSaga {
    async fn handle(
        &self,
        instance: &mut SagaInstance<ShipmentData>,
        _message: ShipmentCancelled,
        _context: &MessageContext,
    ) -> anyhow::Result<()> {
        instance.mark_as_complete();
        Ok(())
    }
}

struct Dispatch;

#[async_trait]
impl Step<IncomingStepContext> for Dispatch {
    fn name(&self) -> &'static str {
        "Dispatch"
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        let message_context = context.message_context();
        let (Some(message), Some(invokers)) = context.message_and_invokers_mut() else {
            anyhow::bail!("message not activated");
        };
        let message = message.clone();
        for invocation in invokers.iter_mut().filter(|i| !i.is_skipped()) {
            invocation
                .invoker_mut()
                .invoke(&message, &message_context)
                .await?;
        }
        next.run(context).await
    }
}

/// Holds every dispatch until all of them have loaded their instance.
struct Rendezvous(Arc<Barrier>);

#[async_trait]
impl Step<IncomingStepContext> for Rendezvous {
    fn name(&self) -> &'static str {
        "Rendezvous"
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        self.0.wait().await;
        next.run(context).await
    }
}

struct NoSends;

#[async_trait]
impl MessageSender for NoSends {
    async fn send(
        &self,
        _destination: Destination,
        _message: LogicalMessage,
        _transaction: &Arc<TransactionContext>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("unexpected send")
    }
}

struct TestHarness {
    persisted: PersistedSagas,
    storage: Arc<SagaStorageTap<InMemorySagaStorage, PersistedSagas>>,
    factories: Vec<Arc<dyn InvokerFactory>>,
    steps: Vec<Arc<dyn Step<IncomingStepContext>>>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_barrier(None)
    }

    fn with_barrier(barrier: Option<Arc<Barrier>>) -> Self {
        let persisted = PersistedSagas::new();
        let storage = Arc::new(SagaStorageTap::new(
            InMemorySagaStorage::new(),
            persisted.clone(),
        ));
        let factories = SagaDefinition::new(ShipmentSaga)
            .initiated_by::<ShipmentRequested>()
            .handles::<ParcelScanned>()
            .handles::<ShipmentCancelled>()
            .build()
            .unwrap();

        let mut steps: Vec<Arc<dyn Step<IncomingStepContext>>> = vec![Arc::new(
            LoadSagaDataStep::new(storage.clone(), UnmatchedSagaPolicy::Ignore),
        )];
        if let Some(barrier) = barrier {
            steps.push(Arc::new(Rendezvous(barrier)));
        }
        steps.push(Arc::new(Dispatch));

        Self {
            persisted,
            storage,
            factories,
            steps,
        }
    }

    async fn deliver<M: BusMessage>(
        &self,
        message: &M,
        extra_headers: &[(&str, &str)],
    ) -> anyhow::Result<()> {
        let mut logical = LogicalMessage::from_message(message)?;
        logical
            .headers_mut()
            .insert(headers::MESSAGE_ID.to_string(), common::MessageId::new().to_string());
        for (key, value) in extra_headers {
            logical
                .headers_mut()
                .insert(key.to_string(), value.to_string());
        }

        let mut context = IncomingStepContext::new(
            TransportMessage::new(Headers::new(), Vec::new()),
            Arc::new(TransactionContext::new()),
            Arc::new(NoSends),
        );
        context.set_message(logical);
        context.set_invokers(HandlerInvokers::new(
            self.factories
                .iter()
                .filter(|f| f.message_type() == M::message_type())
                .map(|f| f.create())
                .collect(),
        ));

        invoke(&self.steps, &mut context).await
    }
}

fn requested(shipment: &str) -> ShipmentRequested {
    ShipmentRequested {
        shipment: shipment.to_string(),
    }
}

#[tokio::test]
async fn header_correlation_finds_instance_created_from_body() {
    let h = TestHarness::new();

    h.deliver(&requested("s-1"), &[]).await.unwrap();
    h.deliver(
        &ParcelScanned {
            location: "hub".to_string(),
        },
        &[("shipment-ref", "s-1")],
    )
    .await
    .unwrap();

    let sagas = h.persisted.of_type("ShipmentData").await;
    assert_eq!(sagas.len(), 1);
    assert_eq!(sagas[0].data["shipment"], json!("s-1"));
    assert_eq!(sagas[0].data["scans"], json!(["hub"]));
    assert_eq!(sagas[0].revision.as_i64(), 1);
}

#[tokio::test]
async fn insert_then_find_by_correlation_returns_same_instance() {
    let h = TestHarness::new();
    h.deliver(&requested("s-2"), &[]).await.unwrap();

    let persisted = h.persisted.snapshot().await;
    let found = h
        .storage
        .find("ShipmentData", "shipment", "s-2")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(persisted, vec![found]);
}

#[tokio::test]
async fn saga_id_correlation_completes_instance() {
    let h = TestHarness::new();
    h.deliver(&requested("s-3"), &[]).await.unwrap();
    let id: SagaId = h.persisted.snapshot().await[0].id;
    let id = id.to_string();

    h.deliver(&ShipmentCancelled, &[("saga-id", id.as_str())])
        .await
        .unwrap();

    assert!(h.persisted.snapshot().await.is_empty());
    assert!(
        h.storage
            .find("ShipmentData", "shipment", "s-3")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn unmatched_scan_leaves_storage_untouched() {
    let h = TestHarness::new();

    h.deliver(
        &ParcelScanned {
            location: "hub".to_string(),
        },
        &[("shipment-ref", "unknown")],
    )
    .await
    .unwrap();

    assert!(h.persisted.snapshot().await.is_empty());
}

#[tokio::test]
async fn concurrent_initiators_create_exactly_one_instance() {
    let h = Arc::new(TestHarness::with_barrier(Some(Arc::new(Barrier::new(2)))));

    let first = tokio::spawn({
        let h = h.clone();
        async move { h.deliver(&requested("s-4"), &[]).await }
    });
    let second = tokio::spawn({
        let h = h.clone();
        async move { h.deliver(&requested("s-4"), &[]).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].downcast_ref::<SagaStorageError>(),
        Some(SagaStorageError::CorrelationConflict { .. })
    ));

    let sagas = h.persisted.of_type("ShipmentData").await;
    assert_eq!(sagas.len(), 1);
    assert_eq!(sagas[0].revision.as_i64(), 0);
    assert_eq!(sagas[0].data["requests"], json!(1));
}

#[tokio::test]
async fn redelivered_loser_finds_the_winning_instance() {
    let h = TestHarness::new();
    h.deliver(&requested("s-5"), &[]).await.unwrap();

    // The redelivery of a message that lost the insert race.
    h.deliver(&requested("s-5"), &[]).await.unwrap();

    let sagas = h.persisted.of_type("ShipmentData").await;
    assert_eq!(sagas.len(), 1);
    assert_eq!(sagas[0].data["requests"], json!(2));
    assert_eq!(sagas[0].revision.as_i64(), 1);
}
