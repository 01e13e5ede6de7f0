//! HTTP gateway in front of the émargement backend.
//!
//! Sign-in traffic goes through the login rate limiter; `/` redirects to the
//! sign-in page; everything else is forwarded upstream.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::get,
    Extension, Router,
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal, task::JoinHandle, time::MissedTickBehavior};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug, error, info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::auth::{login_rate_limit, LoginRateLimiter, RateLimitConfig, RateLimiter};

pub mod handlers;
pub mod state;

pub use state::GatewayState;

/// Everything the `server` command configures.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    port: u16,
    upstream_url: Url,
    rate_limit: RateLimitConfig,
    sweep_interval: Option<Duration>,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(port: u16, upstream_url: Url) -> Self {
        Self {
            port,
            upstream_url,
            rate_limit: RateLimitConfig::default(),
            sweep_interval: None,
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sweep the attempt store on a timer as well. Zero disables it.
    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = (!sweep_interval.is_zero()).then_some(sweep_interval);
        self
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn upstream_url(&self) -> &Url {
        &self.upstream_url
    }

    #[must_use]
    pub fn rate_limit(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval
    }
}

/// Build the gateway router.
#[must_use]
pub fn router(state: Arc<GatewayState>, limiter: Arc<dyn RateLimiter>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health).options(handlers::health))
        .fallback(handlers::proxy)
        .layer(middleware::from_fn_with_state(limiter, login_rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the gateway
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: GatewayConfig) -> Result<()> {
    let limiter = Arc::new(LoginRateLimiter::new(config.rate_limit));
    let sweeper = config
        .sweep_interval
        .map(|period| spawn_sweeper(limiter.clone(), period));

    let state = Arc::new(GatewayState::new(config.upstream_url.clone())?);
    let app = router(state, limiter);

    let listener = TcpListener::bind(format!("::0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    info!(
        upstream = %config.upstream_url,
        "Listening on [::]:{}", config.port
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Gracefully shutdown");

    Ok(())
}

/// Periodic sweep of the attempt store.
pub fn spawn_sweeper(limiter: Arc<LoginRateLimiter>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep(std::time::Instant::now());
            debug!(removed, "periodic attempt sweep");
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("ctrl_c signal received"),
        () = terminate => info!("terminate signal received"),
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
