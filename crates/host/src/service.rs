//! Background service owning the bus lifetime.

use std::sync::Arc;

use bus::Bus;
use tokio_util::sync::CancellationToken;

/// Keeps a started bus running until its stop token fires, then shuts the
/// bus down, letting in-flight messages finish.
pub struct BusService {
    bus: Arc<Bus>,
    stopping: CancellationToken,
}

impl BusService {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            stopping: CancellationToken::new(),
        }
    }

    /// Token that stops the service when cancelled.
    pub fn stopping_token(&self) -> CancellationToken {
        self.stopping.clone()
    }

    pub async fn run(self) {
        tracing::info!(
            address = self.bus.address().unwrap_or("<send-only>"),
            "Bus service running"
        );
        self.stopping.cancelled().await;
        self.bus.shutdown().await;
        tracing::info!("Bus service stopped");
    }
}
