//! Bearer-token gate for destructive admin routes
//!
//! Admin routes stay closed until a token is configured. Callers send
//! `Authorization: Bearer <token>`; the token is compared in constant time.

use super::Rejection;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub struct AdminGuard {
    token: Option<String>,
}

impl AdminGuard {
    /// An empty token leaves the admin routes closed
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.is_empty() {
            tracing::warn!("No admin token configured; admin routes are closed");
        }
        Self {
            token: Some(token).filter(|t| !t.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Check an `Authorization` header value
    pub fn check(&self, authorization: Option<&str>) -> Result<(), Rejection> {
        let Some(expected) = &self.token else {
            return Err(Rejection::AdminDisabled);
        };

        let provided = authorization
            .and_then(|value| value.split_once(' '))
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .filter(|token| !token.is_empty())
            .ok_or(Rejection::MissingAdminToken)?;

        if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            Ok(())
        } else {
            Err(Rejection::InvalidAdminToken)
        }
    }
}

/// Admit only requests carrying the admin bearer token
pub async fn require_admin(
    State(guard): State<Arc<AdminGuard>>,
    req: Request,
    next: Next,
) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match guard.check(authorization) {
        Ok(()) => next.run(req).await,
        Err(rejection) => {
            tracing::warn!(
                path = %req.uri().path(),
                reason = rejection.label(),
                "Admin request rejected"
            );
            let mut resp = rejection.into_response();
            if rejection == Rejection::MissingAdminToken {
                resp.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            resp
        }
    }
}
