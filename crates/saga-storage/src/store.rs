use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    CorrelationProperty, ID_PROPERTY, Result, SagaId, SagaRecord, SagaStorageError,
};

/// Core trait for saga storage implementations.
///
/// A saga storage persists saga instances and finds them by correlation
/// property. Every mutation is guarded by the record's revision; the
/// storage provides this compare-and-swap as its only concurrency control.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStorage: Send + Sync {
    /// Finds the instance of `saga_type` whose `property_name` equals `value`.
    ///
    /// Returns `AmbiguousCorrelation` when more than one instance matches.
    async fn find(
        &self,
        saga_type: &str,
        property_name: &str,
        value: &str,
    ) -> Result<Option<SagaRecord>>;

    /// Inserts a new instance at revision 0.
    ///
    /// Fails with `DuplicateSagaId` if the identity exists, or with
    /// `CorrelationConflict` if another instance owns one of the values.
    async fn insert(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<()>;

    /// Replaces an instance if its stored revision equals `record.revision`.
    ///
    /// Returns the stored record at the next revision.
    async fn update(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<SagaRecord>;

    /// Removes an instance if its stored revision equals `record.revision`.
    async fn delete(&self, record: &SagaRecord) -> Result<()>;
}

#[async_trait]
impl<T: SagaStorage + ?Sized> SagaStorage for Arc<T> {
    async fn find(
        &self,
        saga_type: &str,
        property_name: &str,
        value: &str,
    ) -> Result<Option<SagaRecord>> {
        (**self).find(saga_type, property_name, value).await
    }

    async fn insert(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<()> {
        (**self).insert(record, correlation_properties).await
    }

    async fn update(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<SagaRecord> {
        (**self).update(record, correlation_properties).await
    }

    async fn delete(&self, record: &SagaRecord) -> Result<()> {
        (**self).delete(record).await
    }
}

/// Extension trait providing convenience methods for saga storages.
#[async_trait]
pub trait SagaStorageExt: SagaStorage {
    /// Loads an instance by its identity.
    async fn get(&self, saga_type: &str, id: SagaId) -> Result<Option<SagaRecord>> {
        self.find(saga_type, ID_PROPERTY, &id.to_string()).await
    }

    /// Applies `mutate` to the latest stored state and updates it, reloading
    /// and reapplying on concurrency conflicts.
    ///
    /// Gives up after `max_attempts` and returns the last conflict.
    async fn update_with_retry<F>(
        &self,
        saga_type: &str,
        id: SagaId,
        correlation_properties: &[CorrelationProperty],
        max_attempts: usize,
        mutate: F,
    ) -> Result<SagaRecord>
    where
        F: Fn(&mut SagaRecord) + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut record = self
                .get(saga_type, id)
                .await?
                .ok_or(SagaStorageError::SagaNotFound(id))?;
            mutate(&mut record);

            match self.update(&record, correlation_properties).await {
                Err(e) if e.is_concurrency_conflict() && attempt < max_attempts => {
                    tracing::debug!(saga_id = %id, attempt, error = %e, "retrying saga update");
                    metrics::counter!("saga_concurrency_conflicts_total").increment(1);
                }
                result => return result,
            }
        }
    }
}

// Blanket implementation for all SagaStorage implementations
impl<T: SagaStorage + ?Sized> SagaStorageExt for T {}

/// Parses a saga id lookup value. Values that are not UUIDs match nothing.
pub(crate) fn parse_saga_id(value: &str) -> Option<SagaId> {
    Uuid::parse_str(value).ok().map(SagaId::from_uuid)
}

/// Computes the (property, value) pairs a record must be indexed under.
///
/// The id property is skipped because identity is indexed by the storage
/// itself; properties of other saga types and missing values are skipped too.
pub(crate) fn index_entries(
    record: &SagaRecord,
    correlation_properties: &[CorrelationProperty],
) -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = correlation_properties
        .iter()
        .filter(|p| p.saga_type == record.saga_type && !p.is_id())
        .filter_map(|p| {
            record
                .correlation_value(&p.property_name)
                .map(|v| (p.property_name.clone(), v))
        })
        .collect();
    entries.sort();
    entries.dedup();
    entries
}
