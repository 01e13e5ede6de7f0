//! Request-time guard in front of the sign-in routes.

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use super::client_id::client_identifier;
use super::rate_limit::{RateLimitDecision, RateLimiter, RATE_LIMIT_MESSAGE};

/// Credential exchange endpoint.
pub const SIGN_IN_ENDPOINT: &str = "/api/auth/signin";
/// Sign-in page route.
pub const SIGN_IN_PAGE: &str = "/auth/signin";

/// Whether the path is the sign-in endpoint, the sign-in page, or below them.
#[must_use]
pub fn is_sign_in_route(path: &str) -> bool {
    [SIGN_IN_ENDPOINT, SIGN_IN_PAGE].iter().any(|route| {
        path.strip_prefix(route)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Build the `429` returned to limited clients.
#[must_use]
pub fn rate_limited_response(retry_after: std::time::Duration) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": RATE_LIMIT_MESSAGE })),
    )
        .into_response();
    // Round up so clients never retry while the block is still active.
    let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

/// Axum middleware admitting or rejecting sign-in traffic.
///
/// Other paths pass through untouched.
pub async fn login_rate_limit(
    State(limiter): State<Arc<dyn RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_sign_in_route(request.uri().path()) {
        return next.run(request).await;
    }

    let client_id = client_identifier(request.headers());
    match limiter.check(&client_id) {
        RateLimitDecision::Allowed => next.run(request).await,
        RateLimitDecision::Limited { retry_after } => rate_limited_response(retry_after),
    }
}
