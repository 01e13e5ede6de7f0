//! Rate limiting primitives for the sign-in routes.
//!
//! Flow Overview:
//! 1) Look up (or lazily create) the attempt record for the client. Steps 1-4
//!    run inside one [`AttemptStore::update`] so parallel attempts serialize.
//! 2) Reject without counting while a block is active; reset once it expired.
//! 3) Restart the window when it has elapsed since the first attempt.
//! 4) Count the attempt and block the client once it exceeds the limit.
//! 5) Occasionally sweep stale records so the map stays bounded.
//!
//! Store failures never reach the caller: the limiter logs them and lets the
//! request through.

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::store::{AttemptStore, LoginAttempt, MemoryAttemptStore};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);
const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_CLEANUP_PROBABILITY: f64 = 0.01;

/// Body message returned with every `429`.
pub const RATE_LIMIT_MESSAGE: &str =
    "Trop de tentatives de connexion. Veuillez réessayer plus tard.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, client_id: &str) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _client_id: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Tunables for [`LoginRateLimiter`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitConfig {
    /// Attempts allowed per window before blocking.
    max_attempts: u32,
    /// Period after which the attempt counter starts over.
    window: Duration,
    /// Cooldown once a client is blocked.
    block_duration: Duration,
    /// Chance that a call also sweeps stale records.
    cleanup_probability: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window: DEFAULT_WINDOW,
            block_duration: DEFAULT_BLOCK_DURATION,
            cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    /// Values outside `0.0..=1.0` are clamped; NaN disables the sweep.
    #[must_use]
    pub fn with_cleanup_probability(mut self, probability: f64) -> Self {
        self.cleanup_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    #[must_use]
    pub fn cleanup_probability(&self) -> f64 {
        self.cleanup_probability
    }
}

/// Fixed-window attempt counter with a cooldown block.
#[derive(Debug)]
pub struct LoginRateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn AttemptStore>,
}

impl LoginRateLimiter {
    /// Limiter backed by a process-local store.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryAttemptStore::new()))
    }

    #[must_use]
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn AttemptStore>) -> Self {
        Self { config, store }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Evaluate one attempt at `now`, then maybe sweep.
    pub fn check_at(&self, client_id: &str, now: Instant) -> RateLimitDecision {
        let decision = self.evaluate(client_id, now);

        if self.config.cleanup_probability > 0.0
            && rand::thread_rng().gen_bool(self.config.cleanup_probability)
        {
            self.sweep(now);
        }

        decision
    }

    /// Remove stale records. Failures are logged and reported as zero removals.
    pub fn sweep(&self, now: Instant) -> usize {
        match self.store.sweep(now, self.config.window) {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "swept stale login attempt records");
                }
                removed
            }
            Err(err) => {
                error!("Failed to sweep login attempts: {err}");
                0
            }
        }
    }

    fn evaluate(&self, client_id: &str, now: Instant) -> RateLimitDecision {
        let mut decision = RateLimitDecision::Allowed;
        let result = self.store.update(client_id, &mut |slot| {
            decision = self.gate(slot, client_id, now);
        });

        match result {
            Ok(()) => decision,
            Err(err) => {
                error!("Failed to record login attempt: {err}");
                RateLimitDecision::Allowed
            }
        }
    }

    // Runs inside the store's update, so the read and the write are one step.
    fn gate(
        &self,
        slot: &mut Option<LoginAttempt>,
        client_id: &str,
        now: Instant,
    ) -> RateLimitDecision {
        let attempt = slot.get_or_insert_with(|| LoginAttempt::new(now));

        if attempt.blocked {
            match attempt.block_expires {
                Some(expires) if now <= expires => {
                    return RateLimitDecision::Limited {
                        retry_after: expires.saturating_duration_since(now),
                    };
                }
                _ => attempt.reset(now),
            }
        }

        if now.saturating_duration_since(attempt.first_attempt) > self.config.window {
            attempt.count = 0;
            attempt.first_attempt = now;
        }

        attempt.count = attempt.count.saturating_add(1);
        attempt.last_attempt = now;

        if attempt.count <= self.config.max_attempts {
            return RateLimitDecision::Allowed;
        }

        attempt.blocked = true;
        attempt.block_expires =
            Some(now.checked_add(self.config.block_duration).unwrap_or(now));
        warn!(
            client_id,
            attempts = attempt.count,
            "too many sign-in attempts, blocking client"
        );
        RateLimitDecision::Limited {
            retry_after: self.config.block_duration,
        }
    }
}

impl RateLimiter for LoginRateLimiter {
    fn check(&self, client_id: &str) -> RateLimitDecision {
        self.check_at(client_id, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};

    const CLIENT: &str = "1.2.3.4";

    fn limiter() -> LoginRateLimiter {
        LoginRateLimiter::new(RateLimitConfig::new().with_cleanup_probability(0.0))
    }

    fn stored(limiter: &LoginRateLimiter, client_id: &str) -> Result<LoginAttempt> {
        limiter
            .store
            .get(client_id)?
            .ok_or_else(|| anyhow!("no record for {client_id}"))
    }

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(limiter.check(CLIENT), RateLimitDecision::Allowed);
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = RateLimitConfig::new();
        assert_eq!(config.max_attempts(), 5);
        assert_eq!(config.window(), Duration::from_secs(300));
        assert_eq!(config.block_duration(), Duration::from_secs(900));
        assert!((config.cleanup_probability() - 0.01).abs() < f64::EPSILON);

        let config = config
            .with_max_attempts(3)
            .with_window(Duration::from_secs(60))
            .with_block_duration(Duration::from_secs(120))
            .with_cleanup_probability(4.0);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.block_duration(), Duration::from_secs(120));
        assert!((config.cleanup_probability() - 1.0).abs() < f64::EPSILON);
        assert!(config.with_cleanup_probability(f64::NAN).cleanup_probability() == 0.0);
    }

    #[test]
    fn sixth_attempt_in_window_is_limited() {
        let limiter = limiter();
        let start = Instant::now();
        for second in 0..5 {
            let decision = limiter.check_at(CLIENT, start + Duration::from_secs(second * 2));
            assert_eq!(decision, RateLimitDecision::Allowed, "attempt {second}");
        }
        let decision = limiter.check_at(CLIENT, start + Duration::from_secs(10));
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(15 * 60)
            }
        );
    }

    #[test]
    fn blocked_client_is_not_counted_further() -> Result<()> {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..6 {
            limiter.check_at(CLIENT, start);
        }
        let decision = limiter.check_at(CLIENT, start + Duration::from_secs(60));
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(14 * 60)
            }
        );
        assert_eq!(stored(&limiter, CLIENT)?.count, 6);
        Ok(())
    }

    #[test]
    fn block_expiry_starts_a_fresh_window() -> Result<()> {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..6 {
            limiter.check_at(CLIENT, start);
        }
        let expires = stored(&limiter, CLIENT)?
            .block_expires
            .ok_or_else(|| anyhow!("client should be blocked"))?;

        let before = limiter.check_at(CLIENT, expires - Duration::from_secs(1));
        assert!(!before.is_allowed());

        let after = limiter.check_at(CLIENT, expires + Duration::from_secs(1));
        assert_eq!(after, RateLimitDecision::Allowed);

        let record = stored(&limiter, CLIENT)?;
        assert_eq!(record.count, 1);
        assert!(!record.blocked);
        assert_eq!(record.block_expires, None);
        assert_eq!(record.first_attempt, expires + Duration::from_secs(1));
        Ok(())
    }

    #[test]
    fn window_restarts_after_it_elapses() -> Result<()> {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.check_at(CLIENT, start);
        }
        let later = start + Duration::from_secs(5 * 60 + 1);
        assert_eq!(limiter.check_at(CLIENT, later), RateLimitDecision::Allowed);

        let record = stored(&limiter, CLIENT)?;
        assert_eq!(record.count, 1);
        assert_eq!(record.first_attempt, later);
        Ok(())
    }

    #[test]
    fn attempts_at_window_boundary_still_count() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.check_at(CLIENT, start);
        }
        let boundary = start + Duration::from_secs(5 * 60);
        assert!(!limiter.check_at(CLIENT, boundary).is_allowed());
    }

    #[test]
    fn clients_do_not_share_counters() -> Result<()> {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..6 {
            limiter.check_at("10.0.0.1", start);
        }
        assert!(!limiter.check_at("10.0.0.1", start).is_allowed());
        assert_eq!(limiter.check_at("10.0.0.2", start), RateLimitDecision::Allowed);
        assert_eq!(stored(&limiter, "10.0.0.2")?.count, 1);
        Ok(())
    }

    #[test]
    fn certain_cleanup_sweeps_on_every_call() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let limiter = LoginRateLimiter::with_store(
            RateLimitConfig::new().with_cleanup_probability(1.0),
            store.clone(),
        );
        let start = Instant::now();
        limiter.check_at("idle", start);
        limiter.check_at(CLIENT, start + Duration::from_secs(11 * 60));
        assert_eq!(store.get("idle")?, None);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[derive(Debug)]
    struct BrokenStore;

    impl AttemptStore for BrokenStore {
        fn get(&self, _client_id: &str) -> Result<Option<LoginAttempt>> {
            Err(anyhow!("store offline"))
        }

        fn set(&self, _client_id: &str, _attempt: LoginAttempt) -> Result<()> {
            Err(anyhow!("store offline"))
        }

        fn delete(&self, _client_id: &str) -> Result<()> {
            Err(anyhow!("store offline"))
        }

        fn update(
            &self,
            _client_id: &str,
            _apply: &mut dyn FnMut(&mut Option<LoginAttempt>),
        ) -> Result<()> {
            Err(anyhow!("store offline"))
        }

        fn sweep(&self, _now: Instant, _window: Duration) -> Result<usize> {
            Err(anyhow!("store offline"))
        }
    }

    /// Networked stores take time between reading and writing a record.
    #[derive(Debug, Default)]
    struct SlowStore {
        inner: MemoryAttemptStore,
    }

    impl AttemptStore for SlowStore {
        fn get(&self, client_id: &str) -> Result<Option<LoginAttempt>> {
            let attempt = self.inner.get(client_id);
            std::thread::sleep(Duration::from_millis(2));
            attempt
        }

        fn set(&self, client_id: &str, attempt: LoginAttempt) -> Result<()> {
            self.inner.set(client_id, attempt)
        }

        fn delete(&self, client_id: &str) -> Result<()> {
            self.inner.delete(client_id)
        }

        fn update(
            &self,
            client_id: &str,
            apply: &mut dyn FnMut(&mut Option<LoginAttempt>),
        ) -> Result<()> {
            self.inner.update(client_id, &mut |slot| {
                std::thread::sleep(Duration::from_millis(2));
                apply(slot);
            })
        }

        fn sweep(&self, now: Instant, window: Duration) -> Result<usize> {
            self.inner.sweep(now, window)
        }
    }

    #[test]
    fn parallel_attempts_never_exceed_the_limit() -> Result<()> {
        const THREADS: usize = 20;
        let store = Arc::new(SlowStore::default());
        let limiter = LoginRateLimiter::with_store(
            RateLimitConfig::new().with_cleanup_probability(0.0),
            store.clone(),
        );
        let barrier = std::sync::Barrier::new(THREADS);
        let now = Instant::now();

        let allowed = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        limiter.check_at(CLIENT, now).is_allowed()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(false))
                .filter(|allowed| *allowed)
                .count()
        });
        assert_eq!(allowed, 5);
        let record = store
            .get(CLIENT)?
            .ok_or_else(|| anyhow!("no record for {CLIENT}"))?;
        assert!(record.blocked);
        assert_eq!(record.count, 6);
        Ok(())
    }

    #[test]
    fn store_failures_do_not_reject_requests() {
        let limiter = LoginRateLimiter::with_store(
            RateLimitConfig::new().with_cleanup_probability(1.0),
            Arc::new(BrokenStore),
        );
        for _ in 0..10 {
            assert_eq!(limiter.check(CLIENT), RateLimitDecision::Allowed);
        }
        assert_eq!(limiter.sweep(Instant::now()), 0);
    }
}
