pub mod health;
pub mod purge;
pub mod query;
pub mod relay;
pub mod stream;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::server::state::AppState;

/// Read routes mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(query::search_handler))
        .route("/alerts", get(query::list_handler))
}

/// Destructive routes; the caller puts them behind the admin gate.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/purge", post(purge::handler))
        .route("/clear", post(purge::clear_handler))
}
