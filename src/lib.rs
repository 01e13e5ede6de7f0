//! # Émargement (session gateway and client)
//!
//! Authentication core of the émargement attendance application. Professors
//! sign in to class sessions, supervisors validate attendance, and
//! administrators manage academic data; every one of those screens consumes a
//! `CurrentUser` and talks to the REST backend. This crate owns the two pieces
//! with real state behind them.
//!
//! ## Login Rate Limiter (`auth`)
//!
//! The gateway puts a per-client attempt counter in front of the sign-in
//! endpoint and the sign-in page:
//!
//! - **Window:** 5 attempts per client within 5 minutes; the window restarts
//!   once it has elapsed.
//! - **Block:** the 6th attempt blocks the client for 15 minutes and returns
//!   `429` with a JSON `{"error": "..."}` body.
//! - **Cleanup:** roughly 1% of calls sweep idle and expired records.
//!
//! Clients are identified by the first `X-Forwarded-For` entry, then
//! `X-Real-IP`. Requests with neither share the `unknown` bucket.
//!
//! ## Session Manager (`session`)
//!
//! The client keeps the bearer token in the `auth-token` cookie (7 days,
//! `SameSite=Lax`) and mirrors it in memory. Sign-in is optimistic-then-verify:
//! the returned user is shown immediately and replaced by the identity
//! endpoint's answer after a short settling delay. A failed verification
//! clears the cookie, so a token never outlives a rejected identity check.
//!
//! Token changes are published as events; a one-second poll catches changes
//! made outside the manager (another process clearing the cookie jar, expiry).

pub mod auth;
pub mod cli;
pub mod gateway;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
