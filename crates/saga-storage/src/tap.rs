//! Observable saga storage decorator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{CorrelationProperty, Result, SagaId, SagaRecord, store::SagaStorage};

/// Receives a copy of every successful write made through a [`SagaStorageTap`].
#[async_trait]
pub trait SagaStorageObserver: Send + Sync {
    /// Called after an instance was inserted.
    async fn inserted(&self, record: &SagaRecord);

    /// Called after an instance was updated, with the stored revision.
    async fn updated(&self, record: &SagaRecord);

    /// Called after an instance was deleted.
    async fn deleted(&self, record: &SagaRecord);
}

/// Pass-through storage wrapper that reports writes to an observer.
///
/// Results and errors of the wrapped storage are returned unchanged; the
/// observer is only told about writes that succeeded.
pub struct SagaStorageTap<S, O> {
    inner: S,
    observer: O,
}

impl<S: SagaStorage, O: SagaStorageObserver> SagaStorageTap<S, O> {
    /// Wraps `inner`, reporting to `observer`.
    pub fn new(inner: S, observer: O) -> Self {
        Self { inner, observer }
    }

    /// Returns the wrapped storage.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }
}

#[async_trait]
impl<S: SagaStorage, O: SagaStorageObserver> SagaStorage for SagaStorageTap<S, O> {
    async fn find(
        &self,
        saga_type: &str,
        property_name: &str,
        value: &str,
    ) -> Result<Option<SagaRecord>> {
        self.inner.find(saga_type, property_name, value).await
    }

    async fn insert(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<()> {
        self.inner.insert(record, correlation_properties).await?;
        self.observer.inserted(record).await;
        Ok(())
    }

    async fn update(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<SagaRecord> {
        let updated = self.inner.update(record, correlation_properties).await?;
        self.observer.updated(&updated).await;
        Ok(updated)
    }

    async fn delete(&self, record: &SagaRecord) -> Result<()> {
        self.inner.delete(record).await?;
        self.observer.deleted(record).await;
        Ok(())
    }
}

/// Observer that keeps the last persisted state of every live instance.
///
/// Deleted instances are dropped, so after a run it reflects what the
/// storage holds, independent of the storage implementation.
#[derive(Clone, Default)]
pub struct PersistedSagas {
    sagas: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
}

impl PersistedSagas {
    /// Creates an empty observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last persisted state of every live instance.
    pub async fn snapshot(&self) -> Vec<SagaRecord> {
        self.sagas.read().await.values().cloned().collect()
    }

    /// Returns the live instances of one saga type.
    pub async fn of_type(&self, saga_type: &str) -> Vec<SagaRecord> {
        self.sagas
            .read()
            .await
            .values()
            .filter(|r| r.saga_type == saga_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SagaStorageObserver for PersistedSagas {
    async fn inserted(&self, record: &SagaRecord) {
        self.sagas.write().await.insert(record.id, record.clone());
    }

    async fn updated(&self, record: &SagaRecord) {
        self.sagas.write().await.insert(record.id, record.clone());
    }

    async fn deleted(&self, record: &SagaRecord) {
        self.sagas.write().await.remove(&record.id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{InMemorySagaStorage, Revision, SagaStorageError};

    fn setup() -> (SagaStorageTap<InMemorySagaStorage, PersistedSagas>, PersistedSagas) {
        let observer = PersistedSagas::new();
        let tap = SagaStorageTap::new(InMemorySagaStorage::new(), observer.clone());
        (tap, observer)
    }

    #[tokio::test]
    async fn tap_tracks_writes() {
        let (tap, observer) = setup();
        let record = SagaRecord::new(SagaId::new(), "S", json!({"k": "a"}));
        let props = [CorrelationProperty::new("S", "k")];

        tap.insert(&record, &props).await.unwrap();
        assert_eq!(observer.of_type("S").await.len(), 1);

        let updated = tap.update(&record, &props).await.unwrap();
        assert_eq!(observer.snapshot().await[0].revision, Revision::new(1));

        tap.delete(&updated).await.unwrap();
        assert!(observer.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn failed_writes_are_not_observed_and_errors_pass_through() {
        let (tap, observer) = setup();
        let record = SagaRecord::new(SagaId::new(), "S", json!({}));

        let result = tap.update(&record, &[]).await;

        assert!(matches!(result, Err(SagaStorageError::SagaNotFound(_))));
        assert!(observer.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn reads_pass_through() {
        let (tap, _) = setup();
        let record = SagaRecord::new(SagaId::new(), "S", json!({"k": "a"}));
        tap.inner().insert(&record, &[]).await.unwrap();

        let found = tap.find("S", "k", "a").await.unwrap();
        assert_eq!(found, Some(record));
    }
}
