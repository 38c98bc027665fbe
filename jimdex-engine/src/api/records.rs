//! Raw record intake for stream bridges

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::RawRecord;
use crate::{ApiResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordAccepted {
    pub record_id: String,
}

/// POST /records
///
/// Queues the record for the ingest loop. Responds 400 for a body that is
/// not a record and 503 when the queue is full; bridges are expected to
/// retry the latter.
pub async fn submit_record(
    State(state): State<AppState>,
    body: Result<Json<RawRecord>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RecordAccepted>)> {
    let Json(record) = body?;
    let record_id = record.id.clone();
    state.subscriptions.try_submit(record)?;
    debug!(record_id = %record_id, "Queued raw record");

    Ok((StatusCode::ACCEPTED, Json(RecordAccepted { record_id })))
}

pub fn record_routes() -> Router<AppState> {
    Router::new().route("/records", post(submit_record))
}
