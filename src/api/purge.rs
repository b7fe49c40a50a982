use axum::body::Bytes;
use axum::extract::State;
use axum::response::Redirect;
use axum::Json;

use crate::error::Result;
use crate::ingest;
use crate::server::state::AppState;
use crate::types::{PurgeResponse, PurgeScope};

/// Chat id from an optional JSON body; string or number
fn requested_chat(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let chat = ingest::text_of(value.get("chat_id"));
    let chat = chat.trim();
    (!chat.is_empty()).then(|| chat.to_string())
}

/// POST /api/admin/purge - Delete all alerts, or only one chat's.
///
/// Body `{"chat_id": "..."}` narrows the purge; a missing or empty body
/// purges everything.
pub async fn handler(State(state): State<AppState>, body: Bytes) -> Result<Json<PurgeResponse>> {
    let response = match requested_chat(&body) {
        Some(chat) => {
            let purged = state.store.purge_by_chat(&chat).await?;
            PurgeResponse {
                success: true,
                scope: PurgeScope::ChatSpecific,
                purged: Some(purged),
            }
        }
        None => {
            state.store.purge_all().await?;
            PurgeResponse {
                success: true,
                scope: PurgeScope::All,
                purged: None,
            }
        }
    };
    Ok(Json(response))
}

/// POST /clear - Purge everything and return to the dashboard.
pub async fn clear_handler(State(state): State<AppState>) -> Result<Redirect> {
    state.store.purge_all().await?;
    Ok(Redirect::to("/"))
}
