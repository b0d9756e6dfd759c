//! The receive-pipeline step that loads saga instances before dispatch and
//! persists them afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use common::SagaId;
use pipeline::{IncomingStepContext, LogicalMessage, Next, SagaBinding, SagaState, Step};
use saga_storage::{ID_PROPERTY, SagaRecord, SagaStorage, SagaStorageError, assign_path};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::state::CorrelationState;

/// What to do with a message that matches no instance of a saga it does
/// not initiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmatchedSagaPolicy {
    /// Skip the saga handler and continue with the other handlers.
    #[default]
    Ignore,
    /// Fail the dispatch so the message is redelivered.
    Fail,
}

/// Resolves every activated saga invoker to an instance, runs the rest of
/// the pipeline, then inserts, updates or deletes each instance.
///
/// Must run after handler activation and before dispatch.
pub struct LoadSagaDataStep {
    storage: Arc<dyn SagaStorage>,
    policy: UnmatchedSagaPolicy,
}

impl LoadSagaDataStep {
    pub const NAME: &'static str = "LoadSagaDataStep";

    pub fn new(storage: Arc<dyn SagaStorage>, policy: UnmatchedSagaPolicy) -> Self {
        Self { storage, policy }
    }

    async fn load(&self, context: &mut IncomingStepContext) -> anyhow::Result<()> {
        let (Some(message), Some(invokers)) = context.message_and_invokers_mut() else {
            return Ok(());
        };
        let message_type = message.message_type().unwrap_or_default().to_string();

        for invocation in invokers.iter_mut() {
            if invocation.is_skipped() {
                continue;
            }
            let Some(binding) = invocation.invoker_mut().saga_binding() else {
                continue;
            };
            match self.resolve(&*binding, message, &message_type).await? {
                Some(state) => binding.attach(state),
                None => invocation.skip(),
            }
        }

        Ok(())
    }

    async fn resolve(
        &self,
        binding: &dyn SagaBinding,
        message: &LogicalMessage,
        message_type: &str,
    ) -> anyhow::Result<Option<SagaState>> {
        let saga_type = binding.saga_type();
        let lookups = binding.correlation_lookups(message)?;

        let mut found: Option<SagaRecord> = None;
        for lookup in &lookups {
            let Some(record) = self
                .storage
                .find(saga_type, &lookup.property_name, &lookup.value)
                .await?
            else {
                continue;
            };
            match &found {
                Some(existing) if existing.id != record.id => {
                    return Err(SagaError::AmbiguousCorrelation {
                        saga_type: saga_type.to_string(),
                        message_type: message_type.to_string(),
                        matches: vec![existing.id, record.id],
                    }
                    .into());
                }
                Some(_) => {}
                None => found = Some(record),
            }
        }

        if let Some(record) = found {
            tracing::debug!(
                saga_type,
                message_type,
                saga_id = %record.id,
                revision = record.revision.as_i64(),
                state = %CorrelationState::Found,
                "Saga instance loaded"
            );
            return Ok(Some(SagaState::loaded(record.id, record.revision, record.data)));
        }

        if binding.is_initiated_by(message_type) {
            let mut data = binding.new_data()?;
            let mut id = SagaId::new();
            for lookup in lookups {
                if lookup.property_name == ID_PROPERTY {
                    if let Ok(requested) = lookup.value.parse::<SagaId>() {
                        id = requested;
                    }
                    continue;
                }
                if !assign_path(&mut data, &lookup.property_name, lookup.raw) {
                    tracing::warn!(
                        saga_type,
                        property_name = %lookup.property_name,
                        "Could not write correlation value into new saga data"
                    );
                }
            }
            tracing::debug!(
                saga_type,
                message_type,
                saga_id = %id,
                state = %CorrelationState::NotFound,
                "Saga instance created"
            );
            return Ok(Some(SagaState::new_instance(id, data)));
        }

        match self.policy {
            UnmatchedSagaPolicy::Ignore => {
                tracing::debug!(
                    saga_type,
                    message_type,
                    state = %CorrelationState::Ignored,
                    "Message matches no saga instance, skipping handler"
                );
                Ok(None)
            }
            UnmatchedSagaPolicy::Fail => Err(SagaError::UnmatchedMessage {
                saga_type: saga_type.to_string(),
                message_type: message_type.to_string(),
            }
            .into()),
        }
    }

    async fn persist(&self, context: &mut IncomingStepContext) -> anyhow::Result<()> {
        let Some(invokers) = context.invokers_mut() else {
            return Ok(());
        };

        for invocation in invokers.iter_mut() {
            if invocation.is_skipped() {
                continue;
            }
            let Some(binding) = invocation.invoker_mut().saga_binding() else {
                continue;
            };
            let Some(state) = binding.detach() else {
                continue;
            };

            let saga_type = binding.saga_type().to_string();
            let initial = if state.is_new {
                CorrelationState::NotFound
            } else {
                CorrelationState::Found
            };
            let outcome = if state.invoked {
                initial.after_handler(state.completed, state.unchanged)
            } else {
                initial
            };
            if !outcome.is_terminal() {
                tracing::debug!(
                    saga_type = %saga_type,
                    saga_id = %state.id,
                    state = %outcome,
                    "Saga handler did not run, instance left as stored"
                );
                continue;
            }

            let properties = binding.correlation_properties();
            let record = SagaRecord {
                id: state.id,
                revision: state.revision,
                saga_type: saga_type.clone(),
                data: state.data,
            };

            match outcome {
                CorrelationState::Created => {
                    self.storage
                        .insert(&record, &properties)
                        .await
                        .inspect_err(|e| log_rejected(&saga_type, e))?;
                    metrics::counter!("saga_instances_inserted_total", "saga_type" => saga_type.clone())
                        .increment(1);
                }
                CorrelationState::Updated => {
                    self.storage
                        .update(&record, &properties)
                        .await
                        .inspect_err(|e| log_rejected(&saga_type, e))?;
                    metrics::counter!("saga_instances_updated_total", "saga_type" => saga_type.clone())
                        .increment(1);
                }
                CorrelationState::Deleted => {
                    self.storage
                        .delete(&record)
                        .await
                        .inspect_err(|e| log_rejected(&saga_type, e))?;
                    metrics::counter!("saga_instances_deleted_total", "saga_type" => saga_type.clone())
                        .increment(1);
                }
                _ => {}
            }

            tracing::debug!(
                saga_type = %saga_type,
                saga_id = %record.id,
                revision = record.revision.as_i64(),
                state = %outcome,
                written = outcome.writes_storage(),
                "Saga instance persisted"
            );
        }

        Ok(())
    }
}

fn log_rejected(saga_type: &str, error: &SagaStorageError) {
    if error.is_concurrency_conflict() {
        tracing::warn!(saga_type, error = %error, "Saga instance changed concurrently");
        metrics::counter!("saga_concurrency_conflicts_total", "saga_type" => saga_type.to_string())
            .increment(1);
    } else if error.is_configuration_error() {
        tracing::error!(saga_type, error = %error, "Saga storage rejected instance");
    }
}

#[async_trait]
impl Step<IncomingStepContext> for LoadSagaDataStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut IncomingStepContext,
        next: Next<'_, IncomingStepContext>,
    ) -> anyhow::Result<()> {
        self.load(context).await?;
        next.run(context).await?;
        self.persist(context).await
    }
}
