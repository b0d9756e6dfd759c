//! Read-only view of live saga instances.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use saga_storage::SagaRecord;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct SagaSummary {
    pub id: String,
    pub saga_type: String,
    pub revision: i64,
}

impl From<&SagaRecord> for SagaSummary {
    fn from(record: &SagaRecord) -> Self {
        Self {
            id: record.id.to_string(),
            saga_type: record.saga_type.clone(),
            revision: record.revision.as_i64(),
        }
    }
}

/// GET /sagas: every live instance, oldest id first.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<SagaSummary>> {
    let mut records = state.persisted.snapshot().await;
    records.sort_by_key(|r| r.id);
    Json(records.iter().map(SagaSummary::from).collect())
}

/// GET /sagas/{saga_type}: the full state of every live instance of a type.
pub async fn of_type(
    State(state): State<Arc<AppState>>,
    Path(saga_type): Path<String>,
) -> Result<Json<Vec<SagaRecord>>, StatusCode> {
    let records = state.persisted.of_type(&saga_type).await;
    if records.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(records))
}
