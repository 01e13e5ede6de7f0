use crate::auth::RateLimitConfig;
use crate::gateway::{self, GatewayConfig};
use anyhow::Result;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub upstream_url: Url,
    pub rate_limit: RateLimitConfig,
    pub sweep_interval: Option<Duration>,
}

impl Args {
    fn config(&self) -> GatewayConfig {
        GatewayConfig::new(self.port, self.upstream_url.clone())
            .with_rate_limit(self.rate_limit)
            .with_sweep_interval(self.sweep_interval.unwrap_or(Duration::ZERO))
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    gateway::new(args.config()).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("upstream_url", args.upstream_url.to_string()),
        (
            "login_max_attempts",
            args.rate_limit.max_attempts().to_string(),
        ),
        (
            "login_window",
            format!("{}s", args.rate_limit.window().as_secs()),
        ),
        (
            "login_block",
            format!("{}s", args.rate_limit.block_duration().as_secs()),
        ),
        (
            "login_cleanup_probability",
            args.rate_limit.cleanup_probability().to_string(),
        ),
        (
            "login_sweep",
            args.sweep_interval
                .map_or_else(|| "disabled".to_string(), |d| format!("{}s", d.as_secs())),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit(" abc "), "abc");
    }

    #[test]
    fn config_maps_disabled_sweep_to_none() -> anyhow::Result<()> {
        let args = Args {
            port: 9000,
            upstream_url: Url::parse("http://localhost:3000")?,
            rate_limit: RateLimitConfig::new().with_max_attempts(2),
            sweep_interval: None,
        };
        let config = args.config();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.rate_limit().max_attempts(), 2);
        assert_eq!(config.sweep_interval(), None);

        let args = Args {
            sweep_interval: Some(Duration::from_secs(60)),
            ..args
        };
        assert_eq!(
            args.config().sweep_interval(),
            Some(Duration::from_secs(60))
        );
        Ok(())
    }
}
