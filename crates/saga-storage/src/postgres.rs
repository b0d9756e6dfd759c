use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CorrelationProperty, ID_PROPERTY, Result, Revision, SagaId, SagaRecord, SagaStorageError,
    store::{SagaStorage, index_entries, parse_saga_id},
};

/// PostgreSQL-backed saga storage implementation.
///
/// Instances live in the `sagas` table; correlation values are indexed in
/// `saga_index`, whose unique constraint enforces one instance per value.
/// Only declared correlation properties (and the saga id) can be found.
#[derive(Clone)]
pub struct PostgresSagaStorage {
    pool: PgPool,
}

impl PostgresSagaStorage {
    /// Creates a new PostgreSQL saga storage.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        Ok(SagaRecord {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            revision: Revision::new(row.try_get("revision")?),
            saga_type: row.try_get("saga_type")?,
            data: row.try_get("data")?,
        })
    }

    async fn write_index(
        tx: &mut Transaction<'_, Postgres>,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<()> {
        for (property_name, value) in index_entries(record, correlation_properties) {
            sqlx::query(
                r#"
                INSERT INTO saga_index (saga_type, property_name, property_value, saga_id)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&record.saga_type)
            .bind(&property_name)
            .bind(&value)
            .bind(record.id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_saga_correlation")
                {
                    return SagaStorageError::CorrelationConflict {
                        saga_type: record.saga_type.clone(),
                        property_name: property_name.clone(),
                        value: value.clone(),
                    };
                }
                SagaStorageError::Database(e)
            })?;
        }
        Ok(())
    }

    /// Explains why a revision-guarded statement touched no rows.
    async fn revision_mismatch(
        tx: &mut Transaction<'_, Postgres>,
        record: &SagaRecord,
    ) -> Result<SagaStorageError> {
        let actual: Option<i64> = sqlx::query_scalar("SELECT revision FROM sagas WHERE id = $1")
            .bind(record.id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?;

        Ok(match actual {
            Some(actual) => SagaStorageError::ConcurrencyConflict {
                saga_id: record.id,
                expected: record.revision,
                actual: Revision::new(actual),
            },
            None => SagaStorageError::SagaNotFound(record.id),
        })
    }
}

#[async_trait]
impl SagaStorage for PostgresSagaStorage {
    #[tracing::instrument(skip(self))]
    async fn find(
        &self,
        saga_type: &str,
        property_name: &str,
        value: &str,
    ) -> Result<Option<SagaRecord>> {
        if property_name == ID_PROPERTY {
            let Some(id) = parse_saga_id(value) else {
                return Ok(None);
            };
            let row = sqlx::query(
                r#"
                SELECT id, saga_type, revision, data
                FROM sagas
                WHERE id = $1 AND saga_type = $2
                "#,
            )
            .bind(id.as_uuid())
            .bind(saga_type)
            .fetch_optional(&self.pool)
            .await?;

            return row.map(Self::row_to_record).transpose();
        }

        let rows = sqlx::query(
            r#"
            SELECT s.id, s.saga_type, s.revision, s.data
            FROM saga_index i
            JOIN sagas s ON s.id = i.saga_id
            WHERE i.saga_type = $1 AND i.property_name = $2 AND i.property_value = $3
            LIMIT 2
            "#,
        )
        .bind(saga_type)
        .bind(property_name)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            return Err(SagaStorageError::AmbiguousCorrelation {
                saga_type: saga_type.to_string(),
                property_name: property_name.to_string(),
                value: value.to_string(),
                matches: rows.len(),
            });
        }

        rows.into_iter().next().map(Self::row_to_record).transpose()
    }

    #[tracing::instrument(skip(self, record, correlation_properties), fields(saga_id = %record.id))]
    async fn insert(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<()> {
        if record.revision != Revision::initial() {
            return Err(SagaStorageError::InvalidRevision {
                saga_id: record.id,
                revision: record.revision,
            });
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sagas (id, saga_type, revision, data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.saga_type)
        .bind(record.revision.as_i64())
        .bind(&record.data)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("sagas_pkey")
            {
                return SagaStorageError::DuplicateSagaId(record.id);
            }
            SagaStorageError::Database(e)
        })?;

        Self::write_index(&mut tx, record, correlation_properties).await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(
        skip(self, record, correlation_properties),
        fields(saga_id = %record.id, revision = %record.revision)
    )]
    async fn update(
        &self,
        record: &SagaRecord,
        correlation_properties: &[CorrelationProperty],
    ) -> Result<SagaRecord> {
        let next = record.revision.next();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE sagas
            SET data = $1, revision = $2, updated_at = NOW()
            WHERE id = $3 AND revision = $4
            "#,
        )
        .bind(&record.data)
        .bind(next.as_i64())
        .bind(record.id.as_uuid())
        .bind(record.revision.as_i64())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let error = Self::revision_mismatch(&mut tx, record).await?;
            tx.rollback().await?;
            return Err(error);
        }

        sqlx::query("DELETE FROM saga_index WHERE saga_id = $1")
            .bind(record.id.as_uuid())
            .execute(&mut *tx)
            .await?;
        Self::write_index(&mut tx, record, correlation_properties).await?;

        tx.commit().await?;

        Ok(SagaRecord {
            revision: next,
            ..record.clone()
        })
    }

    #[tracing::instrument(skip(self, record), fields(saga_id = %record.id, revision = %record.revision))]
    async fn delete(&self, record: &SagaRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM sagas WHERE id = $1 AND revision = $2")
            .bind(record.id.as_uuid())
            .bind(record.revision.as_i64())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            let error = Self::revision_mismatch(&mut tx, record).await?;
            tx.rollback().await?;
            return Err(error);
        }

        tx.commit().await?;
        Ok(())
    }
}
