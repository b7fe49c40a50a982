use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap};
use axum::Json;

use crate::error::Result;
use crate::ingest;
use crate::server::state::AppState;
use crate::types::IngestResponse;

/// POST /webhook - Ingest an alert from any monitoring tool.
///
/// Accepts JSON or form bodies; unknown shapes still produce an alert.
pub async fn handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let payload = ingest::parse_payload(&body, content_type, query.as_deref());
    let fields = ingest::normalize(&payload, query.as_deref());

    let alert = state
        .store
        .add(&fields.source, &fields.level, &fields.title, &fields.message)
        .await?;
    state.metrics.record_ingested();

    Ok(Json(IngestResponse::from(&alert)))
}
