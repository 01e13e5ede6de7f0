use anyhow::{anyhow, Context, Result};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use url::Url;

use crate::APP_USER_AGENT;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared by the proxy and health handlers.
#[derive(Clone, Debug)]
pub struct GatewayState {
    client: Client,
    upstream: Url,
}

impl GatewayState {
    /// # Errors
    /// Returns an error if the upstream URL is not http(s) or the client
    /// cannot be built.
    pub fn new(upstream: Url) -> Result<Self> {
        if !matches!(upstream.scheme(), "http" | "https") || upstream.host_str().is_none() {
            return Err(anyhow!("Upstream URL must be http(s) with a host: {upstream}"));
        }
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .redirect(Policy::none())
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self { client, upstream })
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Upstream URL for an incoming path and query.
    #[must_use]
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        let base = self.upstream.as_str().trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{base}{path_and_query}")
        } else {
            format!("{base}/{path_and_query}")
        }
    }
}
