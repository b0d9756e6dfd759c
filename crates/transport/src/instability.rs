//! Transport decorator that makes message handling unreliable on purpose.
//!
//! Used to exercise redelivery and idempotency paths: with a configurable
//! probability, a received message gets a commit callback that always fails,
//! so the message is returned to its queue after its handlers already ran.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Result, TransactionContext, Transport, TransportMessage};

/// Knobs for [`FaultInjectingTransport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultInjectionOptions {
    /// Chance in `[0, 1]` that a received message fails to commit.
    pub commit_failure_probability: f64,

    /// Optional delay before each receive, to widen race windows.
    pub receive_delay: Option<Duration>,
}

impl Default for FaultInjectionOptions {
    fn default() -> Self {
        Self {
            commit_failure_probability: 0.2,
            receive_delay: None,
        }
    }
}

/// Wraps a transport and injects commit failures into received messages.
///
/// Message content is never altered. Sends pass straight through.
pub struct FaultInjectingTransport<T> {
    inner: T,
    options: FaultInjectionOptions,
    rng: Mutex<StdRng>,
}

impl<T: Transport> FaultInjectingTransport<T> {
    /// Wraps `inner` using an entropy-seeded random source.
    pub fn new(inner: T, options: FaultInjectionOptions) -> Self {
        Self::from_rng(inner, options, StdRng::from_entropy())
    }

    /// Wraps `inner` with a fixed seed so runs are reproducible.
    pub fn with_seed(inner: T, options: FaultInjectionOptions, seed: u64) -> Self {
        Self::from_rng(inner, options, StdRng::seed_from_u64(seed))
    }

    fn from_rng(inner: T, options: FaultInjectionOptions, rng: StdRng) -> Self {
        let probability = options.commit_failure_probability.clamp(0.0, 1.0);
        Self {
            inner,
            options: FaultInjectionOptions {
                commit_failure_probability: probability,
                ..options
            },
            rng: Mutex::new(rng),
        }
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_bool(self.options.commit_failure_probability)
    }
}

#[async_trait]
impl<T: Transport> Transport for FaultInjectingTransport<T> {
    fn address(&self) -> Option<&str> {
        self.inner.address()
    }

    async fn create_queue(&self, address: &str) -> Result<()> {
        self.inner.create_queue(address).await
    }

    async fn send(
        &self,
        destination_address: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<()> {
        self.inner.send(destination_address, message, context).await
    }

    async fn receive(&self, context: &TransactionContext) -> Result<Option<TransportMessage>> {
        if let Some(delay) = self.options.receive_delay {
            tokio::time::sleep(delay).await;
        }

        let message = self.inner.receive(context).await?;

        if let Some(received) = message.as_ref().filter(|_| self.should_fail()) {
            let message_id = received.message_id();
            tracing::debug!(?message_id, "injecting commit failure");
            metrics::counter!("bus_transport_injected_faults_total").increment(1);
            context.on_committed(move || async move {
                Err::<(), _>(anyhow::anyhow!(
                    "injected commit failure for message {message_id:?}"
                ))
            });
        }

        Ok(message)
    }
}
