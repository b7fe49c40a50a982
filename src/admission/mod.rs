//! Admission chain for ingestion endpoints
//!
//! Requests pass three gates in order: per-client rate limiting,
//! idempotency-key deduplication, then HMAC signature verification.
//! Each gate is an axum middleware sharing one `AdmissionChain`, and a
//! rejection short-circuits the rest with a JSON `{"error": ...}` body.
//!
//! `admin` holds the separate bearer-token gate for the purge routes.

pub mod admin;
pub mod idempotency;
pub mod rate_limit;
pub mod signature;
pub mod sweeper;

pub use admin::{require_admin, AdminGuard};
pub use idempotency::IdempotencyFilter;
pub use rate_limit::{RateLimitSettings, RateLimiter};
pub use signature::{verify_signature, SignatureHeaders, SignatureMode, SignatureValidator};
pub use sweeper::Sweeper;

use crate::metrics::SentinelMetrics;
use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Largest body the signature stage will buffer (1 MiB)
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Why a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RateLimited,
    Duplicate,
    MissingSignature,
    InvalidSignature,
    StaleTimestamp,
    ReplayedNonce,
    BadBody,
    PayloadTooLarge,
    MissingAdminToken,
    InvalidAdminToken,
    AdminDisabled,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Duplicate => StatusCode::CONFLICT,
            Self::MissingSignature
            | Self::InvalidSignature
            | Self::StaleTimestamp
            | Self::ReplayedNonce
            | Self::MissingAdminToken => StatusCode::UNAUTHORIZED,
            Self::InvalidAdminToken | Self::AdminDisabled => StatusCode::FORBIDDEN,
            Self::BadBody => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Short client-facing reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate limit exceeded",
            Self::Duplicate => "duplicate request",
            Self::MissingSignature => "missing signature",
            Self::InvalidSignature => "invalid signature",
            Self::StaleTimestamp => "stale or invalid timestamp",
            Self::ReplayedNonce => "replayed nonce",
            Self::BadBody => "invalid body",
            Self::PayloadTooLarge => "payload too large",
            Self::MissingAdminToken => "missing admin token",
            Self::InvalidAdminToken => "invalid admin token",
            Self::AdminDisabled => "admin access is not configured",
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Duplicate => "duplicate",
            Self::MissingSignature => "missing_signature",
            Self::InvalidSignature => "invalid_signature",
            Self::StaleTimestamp => "stale_timestamp",
            Self::ReplayedNonce => "replayed_nonce",
            Self::BadBody => "bad_body",
            Self::PayloadTooLarge => "payload_too_large",
            Self::MissingAdminToken => "missing_admin_token",
            Self::InvalidAdminToken => "invalid_admin_token",
            Self::AdminDisabled => "admin_disabled",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.reason() });
        (self.status(), Json(body)).into_response()
    }
}

/// Shared admission state
///
/// One instance per process, injected into the middleware through axum
/// state. The limiter and caches are lock-guarded internally.
pub struct AdmissionChain {
    limiter: Arc<RateLimiter>,
    idempotency: Arc<IdempotencyFilter>,
    signatures: Arc<SignatureValidator>,
    trust_forwarded_for: bool,
    metrics: Option<Arc<SentinelMetrics>>,
}

impl AdmissionChain {
    pub fn new(
        limiter: RateLimiter,
        idempotency: IdempotencyFilter,
        signatures: SignatureValidator,
    ) -> Self {
        Self {
            limiter: Arc::new(limiter),
            idempotency: Arc::new(idempotency),
            signatures: Arc::new(signatures),
            trust_forwarded_for: false,
            metrics: None,
        }
    }

    /// Key clients on the first `X-Forwarded-For` entry when present
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SentinelMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn idempotency(&self) -> &IdempotencyFilter {
        &self.idempotency
    }

    pub fn signatures(&self) -> &SignatureValidator {
        &self.signatures
    }

    /// Register periodic cleanup for every cache the chain owns
    ///
    /// Idempotency keys and nonces are swept once per TTL. Idle rate
    /// buckets are swept every `idle_sweep` (zero disables it).
    pub fn spawn_sweepers(&self, sweeper: &mut Sweeper, idle_sweep: Duration) {
        let idempotency = self.idempotency.clone();
        sweeper.spawn("idempotency", idempotency.ttl(), move || {
            idempotency.sweep()
        });

        if let Some(ttl) = self.signatures.nonce_cache().map(|c| c.ttl()) {
            let signatures = self.signatures.clone();
            sweeper.spawn("nonces", ttl, move || {
                signatures.nonce_cache().map(|c| c.sweep()).unwrap_or(0)
            });
        }

        let limiter = self.limiter.clone();
        sweeper.spawn("rate_limit", idle_sweep, move || {
            limiter.sweep_idle(idle_sweep)
        });
    }

    /// Identify the caller for rate limiting
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_forwarded_for {
            let forwarded = headers
                .get(FORWARDED_FOR_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }

        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn request_client(&self, req: &Request) -> String {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        self.client_key(req.headers(), peer)
    }

    fn reject(&self, rejection: Rejection, client: &str, route: &str) -> Response {
        tracing::warn!(
            client = %client,
            route = %route,
            reason = rejection.label(),
            "Request rejected"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(rejection.label());
        }
        rejection.into_response()
    }
}

/// Route template for logging; raw paths may carry bot tokens
fn route_of(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

/// First gate: token bucket per client
pub async fn rate_limit(
    State(chain): State<Arc<AdmissionChain>>,
    req: Request,
    next: Next,
) -> Response {
    let client = chain.request_client(&req);
    if !chain.limiter.allow(&client) {
        return chain.reject(Rejection::RateLimited, &client, &route_of(&req));
    }
    next.run(req).await
}

/// Second gate: reject repeated `Idempotency-Key` values
pub async fn idempotency(
    State(chain): State<Arc<AdmissionChain>>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim();

    if chain.idempotency.seen(key) {
        let client = chain.request_client(&req);
        return chain.reject(Rejection::Duplicate, &client, &route_of(&req));
    }
    next.run(req).await
}

/// Third gate: HMAC over the raw body
///
/// The body is buffered for verification and handed on intact.
pub async fn signature(
    State(chain): State<Arc<AdmissionChain>>,
    req: Request,
    next: Next,
) -> Response {
    if !chain.signatures.is_enabled() {
        return next.run(req).await;
    }

    let client = chain.request_client(&req);
    let path = route_of(&req);

    let declared_len = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > MAX_BODY_BYTES) {
        return chain.reject(Rejection::PayloadTooLarge, &client, &path);
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to buffer request body");
            return chain.reject(Rejection::BadBody, &client, &path);
        }
    };

    let header_str = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
    let headers = SignatureHeaders {
        signature: header_str(signature::SIGNATURE_HEADER),
        timestamp: header_str(signature::TIMESTAMP_HEADER),
        nonce: header_str(signature::NONCE_HEADER),
    };

    if let Err(rejection) = chain.signatures.check(&bytes, &headers) {
        return chain.reject(rejection, &client, &path);
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::routing::post;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    fn chain(burst: f64, signatures: SignatureValidator) -> Arc<AdmissionChain> {
        Arc::new(AdmissionChain::new(
            RateLimiter::new(RateLimitSettings {
                rate: 1.0,
                burst,
                refill: Duration::from_secs(60),
            }),
            IdempotencyFilter::new(Duration::from_secs(600)),
            signatures,
        ))
    }

    fn app(chain: Arc<AdmissionChain>) -> Router {
        Router::new()
            .route("/in", post(|body: String| async move { body }))
            .layer(middleware::from_fn_with_state(chain.clone(), signature))
            .layer(middleware::from_fn_with_state(chain.clone(), idempotency))
            .layer(middleware::from_fn_with_state(chain, rate_limit))
    }

    fn post_req() -> axum::http::request::Builder {
        axum::http::Request::builder().method("POST").uri("/in")
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_rejection_statuses() {
        assert_eq!(Rejection::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(Rejection::Duplicate.status(), StatusCode::CONFLICT);
        assert_eq!(Rejection::InvalidSignature.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Rejection::ReplayedNonce.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Rejection::BadBody.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejection_body_is_json_reason() {
        let resp = Rejection::Duplicate.into_response();
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["error"], "duplicate request");
    }

    #[test]
    fn test_client_key_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();

        let untrusted = chain(5.0, SignatureValidator::disabled());
        assert_eq!(untrusted.client_key(&headers, Some(peer)), "192.0.2.1");
        assert_eq!(untrusted.client_key(&headers, None), "unknown");

        let trusted = Arc::new(
            AdmissionChain::new(
                RateLimiter::new(RateLimitSettings::default()),
                IdempotencyFilter::default(),
                SignatureValidator::disabled(),
            )
            .trust_forwarded_for(true),
        );
        assert_eq!(trusted.client_key(&headers, Some(peer)), "203.0.113.9");
        assert_eq!(trusted.client_key(&HeaderMap::new(), Some(peer)), "192.0.2.1");
    }

    #[tokio::test]
    async fn test_rate_limit_gate() {
        let app = app(chain(2.0, SignatureValidator::disabled()));

        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(post_req().body(Body::from("x")).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = app
            .oneshot(post_req().body(Body::from("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_idempotency_gate() {
        let app = app(chain(10.0, SignatureValidator::disabled()));
        let send = |key: &'static str| {
            post_req()
                .header("Idempotency-Key", key)
                .body(Body::from("x"))
                .unwrap()
        };

        assert_eq!(app.clone().oneshot(send("a")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(app.clone().oneshot(send("a")).await.unwrap().status(), StatusCode::CONFLICT);
        assert_eq!(app.clone().oneshot(send("b")).await.unwrap().status(), StatusCode::OK);

        // No key, no dedup
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(post_req().body(Body::from("x")).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_signature_gate_preserves_body() {
        let app = app(chain(10.0, SignatureValidator::enforced(SECRET)));
        let body = r#"{"title":"CPU High"}"#;
        let sig = signature::sign(body.as_bytes(), SECRET);

        let resp = app
            .clone()
            .oneshot(
                post_req()
                    .header("X-Sentinel-Signature", sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, body);

        let missing = app
            .clone()
            .oneshot(post_req().body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(
                post_req()
                    .header("X-Sentinel-Signature", "00".repeat(32))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(wrong).await, r#"{"error":"invalid signature"}"#);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let app = app(chain(10.0, SignatureValidator::enforced(SECRET)));
        let resp = app
            .oneshot(
                post_req()
                    .header(header::CONTENT_LENGTH, (MAX_BODY_BYTES + 1).to_string())
                    .header("X-Sentinel-Signature", "00")
                    .body(Body::from(vec![b'a'; MAX_BODY_BYTES + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_gates_run_in_order() {
        let chain = chain(1.0, SignatureValidator::enforced(SECRET));
        let app = app(chain.clone());

        // Unsigned request consumes the only token and records the key
        let resp = app
            .clone()
            .oneshot(
                post_req()
                    .header("Idempotency-Key", "k")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(chain.idempotency().len(), 1);

        // Rate limit fires before the duplicate check
        let resp = app
            .oneshot(
                post_req()
                    .header("Idempotency-Key", "k")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
