//! Concurrent dispatch loops with idle backoff and graceful drain.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BusOptions;
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::error::Result;

/// Exponential idle backoff between `min` and `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: None,
        }
    }

    /// Returns the next wait, doubling from `min` up to `max`.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.min,
            Some(current) => (current * 2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

/// Worker tasks sharing one dispatcher.
pub(crate) struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `options.number_of_workers` dispatch loops.
    pub(crate) fn spawn(dispatcher: Arc<Dispatcher>, options: &BusOptions) -> Self {
        let shutdown = CancellationToken::new();
        let handles = (0..options.number_of_workers)
            .map(|index| {
                let dispatcher = dispatcher.clone();
                let shutdown = shutdown.clone();
                let backoff = Backoff::new(options.min_backoff, options.max_backoff);
                tokio::spawn(run_worker(index, dispatcher, shutdown, backoff))
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Bus workers started");

        Self {
            shutdown,
            handles,
            drain_timeout: options.shutdown_timeout,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Stops polling and waits for in-flight messages, up to the drain
    /// timeout. Workers still busy after the timeout are aborted.
    pub(crate) async fn shutdown(self) {
        self.shutdown.cancel();

        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(self.drain_timeout, join_all(self.handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Bus worker panicked");
                    }
                }
                info!("Bus workers stopped");
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Bus workers did not drain in time, aborting"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

async fn run_worker(
    index: usize,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    mut backoff: Backoff,
) {
    debug!(worker = index, "Bus worker starting");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let outcome = dispatcher.process_next().await;
        match &outcome {
            Err(e) if e.is_transport_error() => {
                error!(worker = index, error = %e, "Transport receive failed");
            }
            Err(e) => {
                debug!(worker = index, error = %e, "Message left for redelivery");
            }
            Ok(_) => {}
        }

        let Some(delay) = pause_after(&outcome, &mut backoff) else {
            continue;
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!(worker = index, "Bus worker stopped");
}

/// Only a committed message keeps the worker polling at once. Idle polls and
/// failed dispatches back off, so a message that keeps failing is retried at
/// the backoff rate.
fn pause_after(outcome: &Result<Dispatched>, backoff: &mut Backoff) -> Option<Duration> {
    if let Ok(Dispatched::Committed { .. }) = outcome {
        backoff.reset();
        return None;
    }
    Some(backoff.next_delay())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;

    #[test]
    fn backoff_doubles_up_to_max_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(35));

        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, [10, 20, 35, 35]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn failed_dispatch_backs_off_until_a_message_commits() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(35));
        let failed: Result<Dispatched> = Err(BusError::NoHandlers {
            message_id: "m-1".to_string(),
            message_type: "Unknown".to_string(),
        });

        assert_eq!(pause_after(&failed, &mut backoff), Some(Duration::from_millis(10)));
        assert_eq!(pause_after(&failed, &mut backoff), Some(Duration::from_millis(20)));
        assert_eq!(pause_after(&Ok(Dispatched::Idle), &mut backoff), Some(Duration::from_millis(35)));

        let committed = Ok(Dispatched::Committed {
            message_id: "m-2".to_string(),
        });
        assert_eq!(pause_after(&committed, &mut backoff), None);
        assert_eq!(pause_after(&failed, &mut backoff), Some(Duration::from_millis(10)));
    }
}
