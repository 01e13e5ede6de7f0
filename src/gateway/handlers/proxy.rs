//! Reverse proxy to the upstream backend.
//!
//! Bodies are buffered in both directions. Hop-by-hop headers are dropped and
//! redirects are passed back to the client instead of being followed.

use axum::{
    body::{to_bytes, Body},
    extract::{Extension, Request},
    http::{header, uri::PathAndQuery, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use crate::gateway::state::GatewayState;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) && *name != header::HOST && *name != header::CONTENT_LENGTH {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": "Service indisponible" })),
    )
        .into_response()
}

// axum fallback handler forwarding everything else upstream
pub async fn proxy(state: Extension<Arc<GatewayState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", PathAndQuery::as_str);
    let url = state.upstream_url(path_and_query);

    let Ok(body) = to_bytes(body, MAX_BODY_BYTES).await else {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    };

    let upstream = state
        .client()
        .request(parts.method.clone(), &url)
        .headers(forwardable(&parts.headers))
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(err) => {
            error!("Upstream request failed: {}", err);
            return bad_gateway();
        }
    };

    let status = upstream.status();
    let headers = forwardable(upstream.headers());
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("Failed to read upstream response: {}", err);
            return bad_gateway();
        }
    };
    debug!(method = %parts.method, status = status.as_u16(), "proxied");

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
