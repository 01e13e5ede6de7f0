use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info_span, Instrument};

use crate::gateway::state::GatewayState;
use crate::GIT_COMMIT_HASH;

const UPSTREAM_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    upstream: String,
}

// axum handler for health
pub async fn health(method: Method, state: Extension<Arc<GatewayState>>) -> impl IntoResponse {
    let probe_span = info_span!("upstream.probe", url = %state.upstream());
    // Any HTTP answer means the upstream is reachable.
    let reachable = match state
        .client()
        .get(state.upstream().as_str())
        .timeout(UPSTREAM_PROBE_TIMEOUT)
        .send()
        .instrument(probe_span)
        .await
    {
        Ok(response) => {
            debug!(status = response.status().as_u16(), "upstream answered");
            true
        }
        Err(err) => {
            error!("Failed to reach upstream: {}", err);
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        upstream: if reachable { "ok" } else { "error" }.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, headers, body)
}
