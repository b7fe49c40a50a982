use axum::extract::{MatchedPath, Request};
use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::state::AppState;
use crate::admission;
use crate::api;
use crate::metrics;

/// Build the complete axum Router with all routes.
///
/// Ingestion routes carry the admission chain (rate limit, idempotency,
/// signature, outermost first); the Telegram drop-in only gets the rate
/// limiter. Purge routes require the admin bearer token. Read, stream, and
/// health routes are unguarded.
pub fn build(state: AppState, cors_origins: &[String]) -> Router {
    let chain = state.admission.clone();

    let ingest = Router::new()
        .route("/webhook", post(api::webhook::handler))
        .route("/bot/{token}/sendMessage", post(api::relay::bot_handler))
        .route_layer(from_fn_with_state(chain.clone(), admission::signature))
        .route_layer(from_fn_with_state(chain.clone(), admission::idempotency))
        .route_layer(from_fn_with_state(chain.clone(), admission::rate_limit));

    let telegram = Router::new()
        .route(
            "/telegram/{bot_part}/{method}",
            post(api::relay::telegram_handler),
        )
        .route_layer(from_fn_with_state(chain, admission::rate_limit));

    let admin = api::admin_routes()
        .route_layer(from_fn_with_state(state.admin.clone(), admission::require_admin));

    Router::new()
        .merge(ingest)
        .merge(telegram)
        .merge(admin)
        .route("/events", get(api::stream::handler))
        .nest("/api", api::routes())
        .route("/health", get(api::health::health))
        .route("/ready", get(api::health::ready))
        .route("/metrics", get(api::health::metrics))
        .layer(from_fn_with_state(state.metrics.clone(), metrics::track_http))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let route = req
                .extensions()
                .get::<MatchedPath>()
                .map(MatchedPath::as_str)
                .unwrap_or("unmatched");
            tracing::info_span!(
                "http",
                trace_id = %Uuid::new_v4().simple(),
                method = %req.method(),
                route = %route,
            )
        }))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
