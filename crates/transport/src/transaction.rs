//! Per-message unit of work.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use uuid::Uuid;

/// Future returned by a lifecycle callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type CommitCallback = Box<dyn FnOnce() -> CallbackFuture + Send>;
type DisposeCallback = Box<dyn FnOnce(TransactionOutcome) -> CallbackFuture + Send>;
type Item = Arc<dyn Any + Send + Sync>;

/// How a transaction context ended up.
///
/// ```text
/// Pending ──► complete() ──┬──► Committed
///    │                     └──► CommitFailed
///    └──► dispose() ──────────► Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionOutcome {
    /// Neither completed nor disposed yet.
    #[default]
    Pending,

    /// Every commit callback succeeded.
    Committed,

    /// `complete()` ran but at least one commit callback failed.
    CommitFailed,

    /// Disposed without ever being completed.
    Aborted,
}

impl TransactionOutcome {
    /// Returns true only for a clean commit.
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed)
    }

    /// Returns the outcome name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOutcome::Pending => "Pending",
            TransactionOutcome::Committed => "Committed",
            TransactionOutcome::CommitFailed => "CommitFailed",
            TransactionOutcome::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised when completing a transaction context.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// One or more commit callbacks failed. All of them still ran.
    #[error("{} commit callback(s) failed: {}", .errors.len(), first_error(.errors))]
    CommitFailed { errors: Vec<anyhow::Error> },

    /// `complete()` was called a second time.
    #[error("Transaction context {0} was already completed")]
    AlreadyCompleted(Uuid),

    /// `complete()` was called after `dispose()`.
    #[error("Transaction context {0} was already disposed")]
    Disposed(Uuid),
}

#[derive(Default)]
struct Callbacks {
    committed: Vec<CommitCallback>,
    commit_failed: Vec<CommitCallback>,
    disposed: Vec<DisposeCallback>,
}

/// Scoped container for everything that belongs to the processing of one
/// message.
///
/// Holds named items (last write wins, absence is normal) and three
/// ordered callback lists. Commit callbacks run from [`complete`], in
/// registration order, only when the caller decides processing succeeded.
/// Dispose callbacks run exactly once from [`dispose`], whether or not the
/// context was completed.
///
/// A context is created right before a message enters the pipeline and is
/// disposed right after; it is never shared between messages.
///
/// [`complete`]: TransactionContext::complete
/// [`dispose`]: TransactionContext::dispose
pub struct TransactionContext {
    id: Uuid,
    items: Mutex<HashMap<String, Item>>,
    callbacks: Mutex<Callbacks>,
    outcome: Mutex<TransactionOutcome>,
    disposed: AtomicBool,
}

impl TransactionContext {
    /// Creates a new, pending transaction context.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            items: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Callbacks::default()),
            outcome: Mutex::new(TransactionOutcome::Pending),
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the identifier used in log output for this context.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the current outcome.
    pub fn outcome(&self) -> TransactionOutcome {
        *lock(&self.outcome)
    }

    /// Returns true once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Saves an item under `key`, replacing any previous value.
    pub fn save<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.save_shared(key, Arc::new(value));
    }

    /// Saves an already shared item under `key`, replacing any previous value.
    pub fn save_shared<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
        lock(&self.items).insert(key.into(), value);
    }

    /// Loads the item saved under `key`.
    ///
    /// Returns `None` when nothing was saved or the saved value has a
    /// different type.
    pub fn load<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        lock(&self.items)
            .get(key)
            .cloned()
            .and_then(|item| item.downcast::<T>().ok())
    }

    /// Loads the item under `key`, creating and saving it when absent.
    ///
    /// The check and the insert happen under one lock, so concurrent
    /// callers all observe the first value created.
    pub fn get_or_add<T, F>(&self, key: &str, create: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut items = lock(&self.items);
        if let Some(existing) = items.get(key).cloned().and_then(|i| i.downcast::<T>().ok()) {
            return existing;
        }
        let value = Arc::new(create());
        items.insert(key.to_string(), value.clone());
        value
    }

    /// Registers a callback to run when the context commits.
    pub fn on_committed<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.warn_if_disposed("on_committed");
        lock(&self.callbacks)
            .committed
            .push(Box::new(move || Box::pin(callback())));
    }

    /// Registers a callback to run when a commit callback failed.
    pub fn on_commit_failed<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.warn_if_disposed("on_commit_failed");
        lock(&self.callbacks)
            .commit_failed
            .push(Box::new(move || Box::pin(callback())));
    }

    /// Registers a callback to run when the context is disposed.
    ///
    /// The callback receives the final outcome so it can decide between
    /// releasing and rolling back whatever it guards.
    pub fn on_disposed<F, Fut>(&self, callback: F)
    where
        F: FnOnce(TransactionOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.warn_if_disposed("on_disposed");
        lock(&self.callbacks)
            .disposed
            .push(Box::new(move |outcome| Box::pin(callback(outcome))));
    }

    /// Runs all commit callbacks in registration order.
    ///
    /// A failing callback does not stop the remaining ones. When any
    /// failed, the commit-failed callbacks run next and the collected
    /// errors are returned.
    #[tracing::instrument(skip(self), fields(transaction_id = %self.id))]
    pub async fn complete(&self) -> Result<(), TransactionError> {
        if self.is_disposed() {
            return Err(TransactionError::Disposed(self.id));
        }
        if self.outcome() != TransactionOutcome::Pending {
            return Err(TransactionError::AlreadyCompleted(self.id));
        }

        let mut errors = Vec::new();
        // Commit callbacks may register further commit callbacks.
        loop {
            let batch = std::mem::take(&mut lock(&self.callbacks).committed);
            if batch.is_empty() {
                break;
            }
            for callback in batch {
                if let Err(error) = callback().await {
                    tracing::warn!(error = %error, "commit callback failed");
                    errors.push(error);
                }
            }
        }

        if errors.is_empty() {
            *lock(&self.outcome) = TransactionOutcome::Committed;
            return Ok(());
        }

        *lock(&self.outcome) = TransactionOutcome::CommitFailed;
        let failed = std::mem::take(&mut lock(&self.callbacks).commit_failed);
        for callback in failed {
            if let Err(error) = callback().await {
                tracing::warn!(error = %error, "commit-failed callback failed");
            }
        }

        Err(TransactionError::CommitFailed { errors })
    }

    /// Runs all dispose callbacks in registration order, exactly once.
    ///
    /// Callback failures are logged and swallowed. A second call is a no-op.
    #[tracing::instrument(skip(self), fields(transaction_id = %self.id))]
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let outcome = {
            let mut outcome = lock(&self.outcome);
            if *outcome == TransactionOutcome::Pending {
                *outcome = TransactionOutcome::Aborted;
            }
            *outcome
        };

        let disposed = std::mem::take(&mut lock(&self.callbacks).disposed);
        for callback in disposed {
            if let Err(error) = callback(outcome).await {
                tracing::error!(error = %error, %outcome, "dispose callback failed");
            }
        }

        lock(&self.items).clear();
    }

    fn warn_if_disposed(&self, what: &str) {
        if self.is_disposed() {
            tracing::warn!(
                transaction_id = %self.id,
                callback = what,
                "callback registered on a disposed transaction context will never run"
            );
        }
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("outcome", &self.outcome())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn first_error(errors: &[anyhow::Error]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_default()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn register(context: &TransactionContext, log: &Log) {
        for name in ["c1", "c2"] {
            let log = log.clone();
            context.on_committed(move || async move {
                record(&log, name);
                Ok(())
            });
        }
        for name in ["d1", "d2"] {
            let log = log.clone();
            context.on_disposed(move |_| async move {
                record(&log, name);
                Ok(())
            });
        }
    }

    #[tokio::test]
    async fn commit_then_dispose_runs_callbacks_in_registration_order() {
        let context = TransactionContext::new();
        let log = Log::default();
        register(&context, &log);

        context.complete().await.unwrap();
        context.dispose().await;

        assert_eq!(entries(&log), ["c1", "c2", "d1", "d2"]);
        assert_eq!(context.outcome(), TransactionOutcome::Committed);
    }

    #[tokio::test]
    async fn dispose_without_complete_skips_commit_callbacks() {
        let context = TransactionContext::new();
        let log = Log::default();
        register(&context, &log);

        context.dispose().await;

        assert_eq!(entries(&log), ["d1", "d2"]);
        assert_eq!(context.outcome(), TransactionOutcome::Aborted);
    }

    #[tokio::test]
    async fn failing_commit_callback_does_not_stop_the_others() {
        let context = TransactionContext::new();
        let log = Log::default();

        context.on_committed(|| async { Err(anyhow::anyhow!("oh no")) });
        let l = log.clone();
        context.on_committed(move || async move {
            record(&l, "after-failure");
            Ok(())
        });
        let l = log.clone();
        context.on_commit_failed(move || async move {
            record(&l, "commit-failed");
            Ok(())
        });

        let result = context.complete().await;

        match result {
            Err(TransactionError::CommitFailed { errors }) => assert_eq!(errors.len(), 1),
            other => panic!("expected commit failure, got {other:?}"),
        }
        assert_eq!(entries(&log), ["after-failure", "commit-failed"]);
        assert_eq!(context.outcome(), TransactionOutcome::CommitFailed);
    }

    #[tokio::test]
    async fn dispose_runs_exactly_once() {
        let context = TransactionContext::new();
        let log = Log::default();
        register(&context, &log);

        context.dispose().await;
        context.dispose().await;

        assert_eq!(entries(&log), ["d1", "d2"]);
    }

    #[tokio::test]
    async fn dispose_callback_errors_are_swallowed() {
        let context = TransactionContext::new();
        let log = Log::default();

        context.on_disposed(|_| async { Err(anyhow::anyhow!("leak")) });
        let l = log.clone();
        context.on_disposed(move |outcome| async move {
            record(&l, outcome.as_str());
            Ok(())
        });

        context.dispose().await;

        assert_eq!(entries(&log), ["Aborted"]);
    }

    #[tokio::test]
    async fn complete_twice_is_rejected() {
        let context = TransactionContext::new();
        context.complete().await.unwrap();
        assert!(matches!(
            context.complete().await,
            Err(TransactionError::AlreadyCompleted(_))
        ));
    }

    #[tokio::test]
    async fn complete_after_dispose_is_rejected() {
        let context = TransactionContext::new();
        context.dispose().await;
        assert!(matches!(
            context.complete().await,
            Err(TransactionError::Disposed(_))
        ));
    }

    #[tokio::test]
    async fn commit_callbacks_may_register_more_commit_callbacks() {
        let context = Arc::new(TransactionContext::new());
        let log = Log::default();

        let inner_context = context.clone();
        let l = log.clone();
        context.on_committed(move || async move {
            record(&l, "outer");
            let l = l.clone();
            inner_context.on_committed(move || async move {
                record(&l, "inner");
                Ok(())
            });
            Ok(())
        });

        context.complete().await.unwrap();

        assert_eq!(entries(&log), ["outer", "inner"]);
    }

    #[test]
    fn items_are_last_writer_wins_and_absence_is_none() {
        let context = TransactionContext::new();
        assert!(context.load::<String>("scope").is_none());

        context.save("scope", "first".to_string());
        context.save("scope", "second".to_string());

        assert_eq!(context.load::<String>("scope").unwrap().as_str(), "second");
        assert!(context.load::<u32>("scope").is_none());
    }

    #[test]
    fn get_or_add_keeps_the_first_value() {
        let context = TransactionContext::new();
        let first = context.get_or_add("counter", || 1_u32);
        let second = context.get_or_add("counter", || 2_u32);
        assert_eq!(*first, 1);
        assert_eq!(*second, 1);
    }
}
