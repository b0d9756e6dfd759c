//! Pipeline steps and the continuation that chains them.

use std::sync::Arc;

use async_trait::async_trait;

/// A named unit of work in a pipeline.
///
/// A step receives the context and the rest of the chain. Calling
/// [`Next::run`] proceeds; returning without calling it short-circuits every
/// later step. Short-circuiting is not an error.
///
/// The name identifies the step for injection and must be stable.
#[async_trait]
pub trait Step<C>: Send + Sync {
    /// Name used to anchor injected steps.
    fn name(&self) -> &'static str;

    /// Processes the context, optionally continuing with `next`.
    async fn process(&self, context: &mut C, next: Next<'_, C>) -> anyhow::Result<()>;
}

/// The remaining steps of a running pipeline.
pub struct Next<'a, C> {
    steps: &'a [Arc<dyn Step<C>>],
}

impl<'a, C: Send + 'static> Next<'a, C> {
    /// Creates a continuation over `steps`.
    pub fn new(steps: &'a [Arc<dyn Step<C>>]) -> Self {
        Self { steps }
    }

    /// Runs the next step, or returns `Ok(())` at the end of the chain.
    pub async fn run(self, context: &mut C) -> anyhow::Result<()> {
        match self.steps.split_first() {
            Some((step, rest)) => step.process(context, Next::new(rest)).await,
            None => Ok(()),
        }
    }
}

/// Runs `steps` against `context` from the first step.
pub async fn invoke<C: Send + 'static>(
    steps: &[Arc<dyn Step<C>>],
    context: &mut C,
) -> anyhow::Result<()> {
    Next::new(steps).run(context).await
}

/// Returns the step names in order.
pub fn step_names<C: Send + 'static>(steps: &[Arc<dyn Step<C>>]) -> Vec<&'static str> {
    steps.iter().map(|s| s.name()).collect()
}
