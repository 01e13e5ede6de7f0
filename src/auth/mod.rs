//! Server-side guard for the sign-in entry points.
//!
//! [`middleware::login_rate_limit`] resolves a client identifier from the
//! proxy headers and asks a [`RateLimiter`] whether the attempt may proceed.
//! [`LoginRateLimiter`] keeps its bookkeeping in an [`AttemptStore`].

pub mod client_id;
pub mod middleware;
pub mod rate_limit;
pub mod store;

pub use client_id::{client_identifier, UNKNOWN_CLIENT};
pub use middleware::{is_sign_in_route, login_rate_limit, SIGN_IN_ENDPOINT, SIGN_IN_PAGE};
pub use rate_limit::{
    LoginRateLimiter, NoopRateLimiter, RateLimitConfig, RateLimitDecision, RateLimiter,
    RATE_LIMIT_MESSAGE,
};
pub use store::{AttemptStore, LoginAttempt, MemoryAttemptStore};
