//! Demo workflow: invoices settled by one or more payments.
//!
//! `InvoiceIssued` and `PaymentReceived` may arrive in any order; either one
//! starts the saga. Once the paid amount covers the invoice the saga sends
//! `InvoiceSettled` to the local queue and completes. The saga is
//! idempotent, so a redelivered payment is never counted twice.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bus::{Bus, BusBuilder};
use pipeline::{BusMessage, MessageContext};
use saga::{
    CorrelationConfig, IdempotencyData, IdempotentSagaData, Saga, SagaDefinition, SagaHandler,
    SagaInstance,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice: String,
    pub amount_cents: i64,
}

impl BusMessage for InvoiceIssued {
    fn message_type() -> &'static str {
        "InvoiceIssued"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceived {
    pub invoice: String,
    pub payment: u32,
    pub amount_cents: i64,
}

impl BusMessage for PaymentReceived {
    fn message_type() -> &'static str {
        "PaymentReceived"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSettled {
    pub invoice: String,
    pub paid_cents: i64,
}

impl BusMessage for InvoiceSettled {
    fn message_type() -> &'static str {
        "InvoiceSettled"
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InvoiceData {
    pub invoice: String,
    pub amount_cents: Option<i64>,
    pub paid_cents: i64,
    pub payments: BTreeSet<u32>,
    #[serde(default)]
    pub idempotency: IdempotencyData,
}

impl IdempotentSagaData for InvoiceData {
    fn idempotency_data(&self) -> &IdempotencyData {
        &self.idempotency
    }

    fn idempotency_data_mut(&mut self) -> &mut IdempotencyData {
        &mut self.idempotency
    }
}

pub struct InvoiceSaga;

impl Saga for InvoiceSaga {
    type Data = InvoiceData;

    fn saga_type(&self) -> &'static str {
        "InvoiceData"
    }

    fn correlate_messages(&self, config: &mut CorrelationConfig<InvoiceData>) {
        config
            .correlate(|m: &InvoiceIssued| m.invoice.clone(), "invoice")
            .correlate(|m: &PaymentReceived| m.invoice.clone(), "invoice");
    }
}

impl InvoiceSaga {
    async fn settle_if_paid(
        instance: &mut SagaInstance<InvoiceData>,
        context: &MessageContext,
    ) -> anyhow::Result<()> {
        let data = instance.data();
        let Some(amount) = data.amount_cents else {
            return Ok(());
        };
        if data.paid_cents < amount {
            return Ok(());
        }

        context
            .send_local(&InvoiceSettled {
                invoice: data.invoice.clone(),
                paid_cents: data.paid_cents,
            })
            .await?;
        instance.mark_as_complete();
        Ok(())
    }
}

#[async_trait]
impl SagaHandler<InvoiceIssued> for InvoiceSaga {
    async fn handle(
        &self,
        instance: &mut SagaInstance<InvoiceData>,
        message: InvoiceIssued,
        context: &MessageContext,
    ) -> anyhow::Result<()> {
        instance.data_mut().amount_cents = Some(message.amount_cents);
        Self::settle_if_paid(instance, context).await
    }
}

#[async_trait]
impl SagaHandler<PaymentReceived> for InvoiceSaga {
    async fn handle(
        &self,
        instance: &mut SagaInstance<InvoiceData>,
        message: PaymentReceived,
        context: &MessageContext,
    ) -> anyhow::Result<()> {
        let data = instance.data_mut();
        if data.payments.insert(message.payment) {
            data.paid_cents += message.amount_cents;
        }
        Self::settle_if_paid(instance, context).await
    }
}

/// Registers the invoice saga and the settlement handler.
pub fn register(builder: BusBuilder) -> bus::Result<BusBuilder> {
    builder
        .handle_fn(|message: InvoiceSettled, _context: MessageContext| async move {
            tracing::info!(
                invoice = %message.invoice,
                paid_cents = message.paid_cents,
                "Invoice settled"
            );
            metrics::counter!("demo_invoices_settled_total").increment(1);
            Ok::<_, anyhow::Error>(())
        })
        .saga(
            SagaDefinition::new(InvoiceSaga)
                .initiated_by::<InvoiceIssued>()
                .initiated_by::<PaymentReceived>()
                .idempotent(),
        )
}

/// Sends `count` invoices of 300 cents, each paid in three parts.
pub async fn send_demo_invoices(bus: &Bus, count: u32) -> bus::Result<()> {
    for n in 0..count {
        let invoice = format!("INV-{n:04}");
        bus.send_local(&InvoiceIssued {
            invoice: invoice.clone(),
            amount_cents: 300,
        })
        .await?;
        for payment in 0..3 {
            bus.send_local(&PaymentReceived {
                invoice: invoice.clone(),
                payment,
                amount_cents: 100,
            })
            .await?;
        }
    }
    tracing::info!(count, "Demo invoices sent");
    Ok(())
}
