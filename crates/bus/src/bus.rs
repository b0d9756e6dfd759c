//! The running bus: sending API and worker lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    BusMessage, Destination, LogicalMessage, MessageSender, OutgoingStep, OutgoingStepContext,
    invoke, step_names,
};
use tokio::sync::Mutex;
use transport::{TransactionContext, Transport};

use crate::dispatcher::Dispatcher;
use crate::error::{BusError, Result};
use crate::worker::WorkerPool;

/// Runs the send pipeline for a message, resolving local sends to the
/// bus's own input queue.
pub(crate) struct BusSender {
    steps: Vec<OutgoingStep>,
    address: Option<String>,
}

impl BusSender {
    pub(crate) fn new(steps: Vec<OutgoingStep>, address: Option<String>) -> Self {
        Self { steps, address }
    }
}

#[async_trait]
impl MessageSender for BusSender {
    async fn send(
        &self,
        destination: Destination,
        message: LogicalMessage,
        transaction: &Arc<TransactionContext>,
    ) -> anyhow::Result<()> {
        let destination = match destination {
            Destination::Address(address) => address,
            Destination::Local => self.address.clone().ok_or(BusError::SendOnly)?,
        };
        tracing::debug!(
            destination = %destination,
            message_type = message.message_type().unwrap_or_default(),
            "Sending message"
        );
        let mut context = OutgoingStepContext::new(message, destination, transaction.clone());
        invoke(&self.steps, &mut context).await
    }
}

/// A started bus.
///
/// Created by [`BusBuilder::start`](crate::BusBuilder::start). Workers run
/// until [`shutdown`](Bus::shutdown) is called.
pub struct Bus {
    transport: Arc<dyn Transport>,
    sender: Arc<BusSender>,
    dispatcher: Arc<Dispatcher>,
    workers: Mutex<Option<WorkerPool>>,
}

impl Bus {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        sender: Arc<BusSender>,
        dispatcher: Arc<Dispatcher>,
        workers: WorkerPool,
    ) -> Self {
        Self {
            transport,
            sender,
            dispatcher,
            workers: Mutex::new(Some(workers)),
        }
    }

    /// Input queue address, or `None` for a send-only bus.
    pub fn address(&self) -> Option<&str> {
        self.transport.address()
    }

    /// The dispatcher the workers drive. Useful for stepping a bus started
    /// with zero workers.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Names of the send pipeline steps, in execution order.
    pub fn send_step_names(&self) -> Vec<&'static str> {
        step_names(&self.sender.steps)
    }

    /// Sends `message` to the queue at `destination`.
    pub async fn send<M: BusMessage>(&self, destination: &str, message: &M) -> Result<()> {
        let logical = LogicalMessage::from_message(message)?;
        self.send_logical(Destination::Address(destination.to_string()), logical)
            .await
    }

    /// Sends `message` to this bus's own input queue. Fails with
    /// [`BusError::SendOnly`] on a send-only bus.
    pub async fn send_local<M: BusMessage>(&self, message: &M) -> Result<()> {
        if self.address().is_none() {
            return Err(BusError::SendOnly);
        }
        let logical = LogicalMessage::from_message(message)?;
        self.send_logical(Destination::Local, logical).await
    }

    /// Sends a prepared logical message in a transaction of its own.
    pub async fn send_logical(&self, destination: Destination, message: LogicalMessage) -> Result<()> {
        let transaction = Arc::new(TransactionContext::new());
        let result: Result<()> = async {
            self.sender
                .send(destination, message, &transaction)
                .await
                .map_err(BusError::Send)?;
            transaction.complete().await?;
            Ok(())
        }
        .await;
        transaction.dispose().await;
        result
    }

    /// Stops the workers, letting in-flight messages finish. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(workers) = self.workers.lock().await.take() {
            tracing::info!(workers = workers.len(), "Bus shutting down");
            workers.shutdown().await;
        }
    }
}

#[async_trait]
impl MessageSender for Bus {
    async fn send(
        &self,
        destination: Destination,
        message: LogicalMessage,
        transaction: &Arc<TransactionContext>,
    ) -> anyhow::Result<()> {
        self.sender.send(destination, message, transaction).await
    }
}
