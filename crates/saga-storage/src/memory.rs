use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    CorrelationProperty, ID_PROPERTY, Result, SagaId, SagaRecord, SagaStorageError,
    store::{SagaStorage, index_entries, parse_saga_id},
};

/// In-memory saga storage implementation for testing.
///
/// Stores deep copies of records, so callers mutating a record they hold
/// never change stored state. Lookups scan the stored data, which means any
/// data property can be used for finding, indexed or not.
#[derive(Clone, Default)]
pub struct InMemorySagaStorage {
    sagas: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
}

impl InMemorySagaStorage {
    /// Creates a new empty in-memory saga storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored instances.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Returns a copy of every stored instance.
    pub async fn all(&self) -> Vec<SagaRecord> {
        self.sagas.read().await.values().cloned().collect()
    }

    /// Clears all instances.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }

    fn check_correlation_conflicts(
        sagas: &HashMap<SagaId, SagaRecord>,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<()> {
        for (property_name, value) in index_entries(record, correlation_properties) {
            let taken = sagas.values().any(|other| {
                other.id != record.id
                    && other.saga_type == record.saga_type
                    && other.correlation_value(&property_name).as_deref() == Some(value.as_str())
            });
            if taken {
                return Err(SagaStorageError::CorrelationConflict {
                    saga_type: record.saga_type.clone(),
                    property_name,
                    value,
                });
            }
        }
        Ok(())
    }

    fn check_revision(stored: &SagaRecord, record: &SagaRecord) -> Result<()> {
        if stored.revision != record.revision {
            return Err(SagaStorageError::ConcurrencyConflict {
                saga_id: record.id,
                expected: record.revision,
                actual: stored.revision,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStorage for InMemorySagaStorage {
    async fn find(
        &self,
        saga_type: &str,
        property_name: &str,
        value: &str,
    ) -> Result<Option<SagaRecord>> {
        let sagas = self.sagas.read().await;

        if property_name == ID_PROPERTY {
            return Ok(parse_saga_id(value)
                .and_then(|id| sagas.get(&id))
                .filter(|r| r.saga_type == saga_type)
                .cloned());
        }

        let mut matches = sagas.values().filter(|r| {
            r.saga_type == saga_type && r.correlation_value(property_name).as_deref() == Some(value)
        });

        let first = matches.next().cloned();
        let rest = matches.count();
        if rest > 0 {
            return Err(SagaStorageError::AmbiguousCorrelation {
                saga_type: saga_type.to_string(),
                property_name: property_name.to_string(),
                value: value.to_string(),
                matches: rest + 1,
            });
        }

        Ok(first)
    }

    async fn insert(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<()> {
        if record.revision.as_i64() != 0 {
            return Err(SagaStorageError::InvalidRevision {
                saga_id: record.id,
                revision: record.revision,
            });
        }

        let mut sagas = self.sagas.write().await;

        if sagas.contains_key(&record.id) {
            return Err(SagaStorageError::DuplicateSagaId(record.id));
        }
        Self::check_correlation_conflicts(&sagas, record, correlation_properties)?;

        sagas.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<SagaRecord> {
        let mut sagas = self.sagas.write().await;

        let stored = sagas
            .get(&record.id)
            .ok_or(SagaStorageError::SagaNotFound(record.id))?;
        Self::check_revision(stored, record)?;
        Self::check_correlation_conflicts(&sagas, record, correlation_properties)?;

        let updated = SagaRecord {
            revision: record.revision.next(),
            ..record.clone()
        };
        sagas.insert(record.id, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, record: &SagaRecord) -> Result<()> {
        let mut sagas = self.sagas.write().await;

        let stored = sagas
            .get(&record.id)
            .ok_or(SagaStorageError::SagaNotFound(record.id))?;
        Self::check_revision(stored, record)?;

        sagas.remove(&record.id);
        Ok(())
    }
}
