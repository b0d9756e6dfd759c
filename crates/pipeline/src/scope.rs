//! Per-message resource scopes released when the transaction is disposed.

use std::sync::Arc;

use async_trait::async_trait;
use transport::{TransactionContext, TransactionOutcome};

use crate::context::IncomingStepContext;
use crate::step::{Next, Step};

/// Transaction item key under which the active scope is saved.
pub const SCOPE_ITEM: &str = "current-scope";

/// Creates and releases disposable scopes, e.g. a dependency container
/// child scope or a pooled connection.
#[async_trait]
pub trait ScopeProvider: Send + Sync + 'static {
    type Scope: Send + Sync + 'static;

    async fn create_scope(&self) -> anyhow::Result<Self::Scope>;

    /// Releases a scope. Called exactly once per created scope, from the
    /// transaction's dispose callbacks.
    async fn release_scope(
        &self,
        scope: Arc<Self::Scope>,
        outcome: TransactionOutcome,
    ) -> anyhow::Result<()>;
}

/// Returns the scope of the current transaction, creating it on first use.
///
/// A created scope is saved as a transaction item and its release is
/// registered with `on_disposed`, so it is released even if a later step
/// fails.
pub async fn scope_for<P: ScopeProvider>(
    provider: &Arc<P>,
    transaction: &TransactionContext,
) -> anyhow::Result<Arc<P::Scope>> {
    if let Some(existing) = transaction.load::<P::Scope>(SCOPE_ITEM) {
        return Ok(existing);
    }

    let scope = Arc::new(provider.create_scope().await?);
    tracing::debug!(transaction_id = %transaction.id(), "Scope created");
    transaction.save_shared(SCOPE_ITEM, scope.clone());

    let provider = provider.clone();
    let released = scope.clone();
    transaction.on_disposed(move |outcome| async move {
        provider.release_scope(released, outcome).await
    });

    Ok(scope)
}

/// Receive step that opens a scope for the message before the rest of the
/// pipeline runs.
pub struct CreateScopeStep<P> {
    provider: Arc<P>,
}

impl<P: ScopeProvider> CreateScopeStep<P> {
    pub const NAME: &'static str = "CreateScopeStep";

    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: ScopeProvider> Step<IncomingStepContext> for CreateScopeStep<P> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        let scope = scope_for(&self.provider, context.transaction()).await?;
        context.items_mut().insert(SCOPE_ITEM, scope);
        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct CountingProvider {
        events: Mutex<Vec<String>>,
    }

    struct TestScope(usize);

    #[async_trait]
    impl ScopeProvider for CountingProvider {
        type Scope = TestScope;

        async fn create_scope(&self) -> anyhow::Result<TestScope> {
            let mut events = self.events.lock().unwrap();
            events.push("created".to_string());
            Ok(TestScope(events.len()))
        }

        async fn release_scope(
            &self,
            scope: Arc<TestScope>,
            outcome: TransactionOutcome,
        ) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("released {} {}", scope.0, outcome));
            Ok(())
        }
    }

    #[tokio::test]
    async fn scope_is_created_once_and_released_on_dispose() {
        let provider = Arc::new(CountingProvider::default());
        let transaction = TransactionContext::new();

        let first = scope_for(&provider, &transaction).await.unwrap();
        let second = scope_for(&provider, &transaction).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(transaction.load::<TestScope>(SCOPE_ITEM).is_some());

        transaction.dispose().await;

        assert_eq!(
            *provider.events.lock().unwrap(),
            ["created", "released 1 Aborted"]
        );
    }

    #[tokio::test]
    async fn committed_outcome_reaches_the_provider() {
        let provider = Arc::new(CountingProvider::default());
        let transaction = TransactionContext::new();

        scope_for(&provider, &transaction).await.unwrap();
        transaction.complete().await.unwrap();
        transaction.dispose().await;

        assert_eq!(
            provider.events.lock().unwrap().last().map(String::as_str),
            Some("released 1 Committed")
        );
    }
}
