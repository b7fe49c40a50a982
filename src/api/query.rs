use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::AlertList;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub source: String,
}

/// GET /api/search - Filter alerts by text, level, and source.
pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<AlertList>> {
    let alerts = state
        .store
        .search(params.q.trim(), params.level.trim(), params.source.trim())
        .await?;
    Ok(Json(AlertList::from(alerts)))
}

/// GET /api/alerts - All live alerts, newest first.
pub async fn list_handler(State(state): State<AppState>) -> Result<Json<AlertList>> {
    let alerts = state.store.list().await?;
    Ok(Json(AlertList::from(alerts)))
}
