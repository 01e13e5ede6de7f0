use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;
use url::Url;

use crate::auth::RateLimitConfig;

pub const CMD_SERVER: &str = "server";

pub const ARG_PORT: &str = "port";
pub const ARG_UPSTREAM_URL: &str = "upstream-url";
pub const ARG_LOGIN_MAX_ATTEMPTS: &str = "login-max-attempts";
pub const ARG_LOGIN_WINDOW_SECONDS: &str = "login-window-seconds";
pub const ARG_LOGIN_BLOCK_SECONDS: &str = "login-block-seconds";
pub const ARG_LOGIN_CLEANUP_PROBABILITY: &str = "login-cleanup-probability";
pub const ARG_LOGIN_SWEEP_SECONDS: &str = "login-sweep-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub port: u16,
    pub upstream_url: Url,
    pub rate_limit: RateLimitConfig,
    /// `None` when the periodic sweep is disabled.
    pub sweep_interval: Option<Duration>,
}

impl Options {
    /// Parse server arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the upstream URL is missing or invalid.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

        let upstream_url = match matches.get_one::<String>(ARG_UPSTREAM_URL) {
            Some(value) if !value.trim().is_empty() => value.trim(),
            _ => anyhow::bail!("missing required argument: --{ARG_UPSTREAM_URL}"),
        };
        let upstream_url = Url::parse(upstream_url)
            .with_context(|| format!("invalid --{ARG_UPSTREAM_URL}: {upstream_url}"))?;

        let seconds = |id: &str, default: u64| {
            Duration::from_secs(matches.get_one::<u64>(id).copied().unwrap_or(default))
        };

        let mut rate_limit = RateLimitConfig::new()
            .with_window(seconds(ARG_LOGIN_WINDOW_SECONDS, 300))
            .with_block_duration(seconds(ARG_LOGIN_BLOCK_SECONDS, 900));
        if let Some(max_attempts) = matches.get_one::<u32>(ARG_LOGIN_MAX_ATTEMPTS) {
            rate_limit = rate_limit.with_max_attempts(*max_attempts);
        }
        if let Some(probability) = matches.get_one::<f64>(ARG_LOGIN_CLEANUP_PROBABILITY) {
            rate_limit = rate_limit.with_cleanup_probability(*probability);
        }

        let sweep_interval = Some(seconds(ARG_LOGIN_SWEEP_SECONDS, 0)).filter(|d| !d.is_zero());

        Ok(Self {
            port,
            upstream_url,
            rate_limit,
            sweep_interval,
        })
    }
}

#[must_use]
pub fn command() -> Command {
    Command::new(CMD_SERVER)
        .about("Run the gateway in front of the web backend")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("EMARGEMENT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_UPSTREAM_URL)
                .long(ARG_UPSTREAM_URL)
                .help("Backend origin that non-gateway traffic is forwarded to")
                .env("EMARGEMENT_UPSTREAM_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_LOGIN_MAX_ATTEMPTS)
                .long(ARG_LOGIN_MAX_ATTEMPTS)
                .help("Sign-in attempts allowed per client within the window")
                .env("EMARGEMENT_LOGIN_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_WINDOW_SECONDS)
                .long(ARG_LOGIN_WINDOW_SECONDS)
                .help("Length of the sign-in attempt window in seconds")
                .env("EMARGEMENT_LOGIN_WINDOW_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_BLOCK_SECONDS)
                .long(ARG_LOGIN_BLOCK_SECONDS)
                .help("How long a client stays blocked once over the limit")
                .env("EMARGEMENT_LOGIN_BLOCK_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_CLEANUP_PROBABILITY)
                .long(ARG_LOGIN_CLEANUP_PROBABILITY)
                .help("Chance that a sign-in check also prunes stale records (0.0 - 1.0)")
                .env("EMARGEMENT_LOGIN_CLEANUP_PROBABILITY")
                .default_value("0.01")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_SWEEP_SECONDS)
                .long(ARG_LOGIN_SWEEP_SECONDS)
                .help("Interval of the background prune of stale records, 0 disables it")
                .env("EMARGEMENT_LOGIN_SWEEP_SECONDS")
                .default_value("0")
                .value_parser(clap::value_parser!(u64)),
        )
}
