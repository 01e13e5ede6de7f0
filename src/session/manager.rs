//! Session/token manager.
//!
//! Flow Overview:
//! 1) `sign_in` exchanges credentials, persists the token, shows the returned
//!    user right away (`Verifying`), then confirms it with the identity endpoint
//!    after a settling delay (`LoggedIn`).
//! 2) `current_user` re-reads the persisted token and answers from the cache
//!    while it is fresh; otherwise it asks the identity endpoint.
//! 3) `sign_out` tells the backend, then clears the cookie and the cache.
//! 4) `poll_once` (driven by [`super::watcher::TokenWatcher`]) notices tokens
//!    that changed outside this manager.
//!
//! Every token change bumps a generation counter. Remote results are applied
//! only when the generation they started under is still current, so a slow
//! identity fetch can never resurrect a session that was signed out meanwhile.
//!
//! The in-memory token is a mirror. The cookie store is re-read at each sync
//! point and wins on disagreement.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::api::{AuthApi, DEFAULT_TIMEOUT};
use super::cookie::{TokenStore, SESSION_EXPIRY_SECONDS};
use super::errors::{ApiError, CookieError, SessionError};
use super::types::{
    valid_email, AuthToken, Credentials, CurrentUser, SessionState, SignInResponse,
    TokenChangeSource, TokenEvent,
};

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FETCH_RETRIES: u32 = 1;
const EVENT_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Cookie max-age on sign-in.
    session_expiry: Duration,
    /// Pause between the credential exchange and the verification fetch.
    settle_delay: Duration,
    /// How long a fetched user is served from cache.
    stale_after: Duration,
    poll_interval: Duration,
    /// Timeout applied to each remote call.
    request_timeout: Duration,
    /// Extra identity fetch attempts after a transient failure.
    fetch_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_expiry: Duration::from_secs(SESSION_EXPIRY_SECONDS),
            settle_delay: DEFAULT_SETTLE_DELAY,
            stale_after: DEFAULT_STALE_AFTER,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_TIMEOUT,
            fetch_retries: DEFAULT_FETCH_RETRIES,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session_expiry(mut self, session_expiry: Duration) -> Self {
        self.session_expiry = session_expiry;
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Intervals below one millisecond are raised to one millisecond.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub fn with_fetch_retries(mut self, fetch_retries: u32) -> Self {
        self.fetch_retries = fetch_retries;
        self
    }

    #[must_use]
    pub fn session_expiry(&self) -> Duration {
        self.session_expiry
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn fetch_retries(&self) -> u32 {
        self.fetch_retries
    }
}

#[derive(Clone, Debug)]
struct CachedUser {
    user: CurrentUser,
    fetched_at: Instant,
}

impl CachedUser {
    fn new(user: CurrentUser) -> Self {
        Self {
            user,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, stale_after: Duration) -> bool {
        self.fetched_at.elapsed() < stale_after
    }
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    token: Option<AuthToken>,
    cached: Option<CachedUser>,
    force_refresh: bool,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }
}

pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    cookies: Arc<dyn TokenStore>,
    config: SessionConfig,
    // Never held across an await.
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<TokenEvent>,
}

impl SessionManager {
    /// Build a manager and mirror whatever token is already persisted.
    ///
    /// The state stays `LoggedOut` until the token has been verified through
    /// [`Self::current_user`].
    #[must_use]
    pub fn new(api: Arc<dyn AuthApi>, cookies: Arc<dyn TokenStore>, config: SessionConfig) -> Self {
        let token = cookies.load().unwrap_or_else(|err| {
            warn!("Failed to read persisted session: {err}");
            None
        });
        let (state_tx, _) = watch::channel(SessionState::LoggedOut);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api,
            cookies,
            config,
            inner: Mutex::new(Inner {
                token,
                ..Inner::default()
            }),
            state_tx,
            events_tx,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Receiver for token changes, whatever their origin.
    #[must_use]
    pub fn token_events(&self) -> broadcast::Receiver<TokenEvent> {
        self.events_tx.subscribe()
    }

    /// Exchange credentials, persist the token and verify it.
    ///
    /// The returned user is the identity endpoint's answer. If a sign-out or
    /// another sign-in supersedes this one while it is in flight, the exchange
    /// result is returned untouched and nothing is applied locally.
    ///
    /// # Errors
    /// `Validation` for a malformed email, the collaborator's error when the
    /// exchange fails, and `Authentication` when verification fails. Local
    /// token state is cleared before any of these is returned.
    pub async fn sign_in(&self, credentials: Credentials) -> Result<SignInResponse, SessionError> {
        if !valid_email(credentials.email.trim()) {
            return Err(SessionError::Validation(
                "Adresse e-mail invalide".to_string(),
            ));
        }

        let generation = {
            let mut inner = self.lock();
            let generation = inner.bump();
            self.set_state(SessionState::Authenticating);
            generation
        };

        let exchanged = match timeout(self.config.request_timeout, self.api.sign_in(&credentials))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout("Sign-in request timed out.".to_string()).into()),
        };

        let response = match exchanged {
            Ok(response) => response,
            Err(err) => {
                let mut inner = self.lock();
                if inner.generation == generation {
                    self.clear_or_log(&mut inner, TokenChangeSource::Rejected);
                }
                return Err(err);
            }
        };

        let generation = {
            let mut inner = self.lock();
            if inner.generation != generation {
                debug!("sign-in superseded before the token was stored");
                return Ok(response);
            }
            let generation = inner.bump();
            if let Err(err) = self
                .cookies
                .store(&response.token, self.config.session_expiry)
            {
                inner.cached = None;
                self.set_state(SessionState::LoggedOut);
                return Err(err.into());
            }
            inner.token = Some(response.token.clone());
            inner.cached = Some(CachedUser::new(response.user.clone()));
            inner.force_refresh = false;
            self.set_state(SessionState::Verifying {
                user: response.user.clone(),
            });
            self.emit(TokenEvent::Stored(TokenChangeSource::SignIn));
            generation
        };

        sleep(self.config.settle_delay).await;
        if !self.is_current(generation) {
            return Ok(response);
        }

        let verified = self.fetch_user(&response.token).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("sign-in superseded during verification");
            return Ok(response);
        }
        match verified {
            Ok(Some(user)) => {
                inner.cached = Some(CachedUser::new(user.clone()));
                self.set_state(SessionState::LoggedIn { user: user.clone() });
                info!(user_id = %user.id, role = %user.role, "signed in");
                Ok(SignInResponse {
                    user,
                    token: response.token,
                })
            }
            Ok(None) => {
                warn!("identity endpoint refused a freshly issued token");
                self.clear_or_log(&mut inner, TokenChangeSource::Rejected);
                Err(SessionError::Authentication { message: None })
            }
            Err(err) => {
                warn!("Failed to verify new session: {err}");
                self.clear_or_log(&mut inner, TokenChangeSource::Rejected);
                Err(SessionError::Authentication {
                    message: Some(err.to_string()),
                })
            }
        }
    }

    /// Sign out locally and on the backend. Backend failures are ignored;
    /// calling this while logged out is a no-op.
    ///
    /// # Errors
    /// Only when the cookie store cannot be cleared.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let token = {
            let mut inner = self.lock();
            inner.bump();
            let persisted = self.cookies.load().unwrap_or_else(|err| {
                warn!("Failed to read persisted session: {err}");
                None
            });
            persisted.or_else(|| inner.token.clone())
        };

        if let Some(token) = token.as_ref() {
            match timeout(self.config.request_timeout, self.api.sign_out(token)).await {
                Ok(Ok(())) => debug!("backend session closed"),
                Ok(Err(err)) => debug!("Ignoring sign-out failure: {err}"),
                Err(_) => debug!("Ignoring sign-out timeout"),
            }
        }

        let mut inner = self.lock();
        let result = self.clear_locked(&mut inner, TokenChangeSource::SignOut);
        if token.is_some() {
            info!("signed out");
        }
        result.map_err(SessionError::from)
    }

    /// User behind the persisted token, or `None` without a token.
    ///
    /// # Errors
    /// `Cookie` when the token cannot be read, `Authentication` when the
    /// identity endpoint keeps failing. The token is cleared in the latter case,
    /// and also when the endpoint reports no user.
    pub async fn current_user(&self) -> Result<Option<CurrentUser>, SessionError> {
        let (token, generation) = {
            let mut inner = self.lock();
            let Some(token) = self.sync_token_locked(&mut inner)? else {
                return Ok(None);
            };
            if !inner.force_refresh {
                if let Some(cached) = inner
                    .cached
                    .as_ref()
                    .filter(|cached| cached.is_fresh(self.config.stale_after))
                {
                    return Ok(Some(cached.user.clone()));
                }
            }
            (token, inner.generation)
        };

        let fetched = self.fetch_user(&token).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("discarding identity fetch from a superseded session");
            return Ok(inner.cached.as_ref().map(|cached| cached.user.clone()));
        }
        match fetched {
            Ok(Some(user)) => {
                inner.cached = Some(CachedUser::new(user.clone()));
                inner.force_refresh = false;
                self.set_state(SessionState::LoggedIn { user: user.clone() });
                Ok(Some(user))
            }
            Ok(None) => {
                debug!("token no longer maps to a user");
                self.clear_locked(&mut inner, TokenChangeSource::Rejected)?;
                Ok(None)
            }
            Err(err) => {
                warn!("Failed to fetch current user: {err}");
                self.clear_or_log(&mut inner, TokenChangeSource::Rejected);
                Err(SessionError::Authentication {
                    message: Some(err.to_string()),
                })
            }
        }
    }

    /// Make the next [`Self::current_user`] bypass the cache.
    pub fn invalidate(&self) {
        self.lock().force_refresh = true;
    }

    /// Re-fetch the user from the identity endpoint.
    ///
    /// # Errors
    /// Same as [`Self::current_user`].
    pub async fn refresh(&self) -> Result<Option<CurrentUser>, SessionError> {
        self.invalidate();
        self.current_user().await
    }

    /// Compare the persisted token with the mirror and react to differences.
    ///
    /// A token that appeared is verified right away.
    ///
    /// # Errors
    /// When the cookie store cannot be read or the new token fails verification.
    pub async fn poll_once(&self) -> Result<(), SessionError> {
        let appeared = {
            let mut inner = self.lock();
            let before = inner.generation;
            let token = self.sync_token_locked(&mut inner)?;
            inner.generation != before && token.is_some()
        };
        if appeared {
            self.current_user().await?;
        }
        Ok(())
    }

    async fn fetch_user(&self, token: &AuthToken) -> Result<Option<CurrentUser>, ApiError> {
        let mut retries_left = self.config.fetch_retries;
        loop {
            let result = match timeout(
                self.config.request_timeout,
                self.api.fetch_current_user(token),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout(
                    "Identity request timed out.".to_string(),
                )),
            };
            match result {
                Err(err) if err.is_transient() && retries_left > 0 => {
                    retries_left -= 1;
                    warn!("Identity fetch failed, retrying: {err}");
                }
                other => return other,
            }
        }
    }

    /// Re-derive the mirror from the cookie store.
    fn sync_token_locked(&self, inner: &mut Inner) -> Result<Option<AuthToken>, CookieError> {
        let persisted = self.cookies.load()?;
        if persisted != inner.token {
            inner.bump();
            inner.cached = None;
            inner.force_refresh = false;
            self.set_state(SessionState::LoggedOut);
            if persisted.is_some() {
                debug!("session token changed outside the manager");
                self.emit(TokenEvent::Stored(TokenChangeSource::External));
            } else {
                info!("session token disappeared");
                self.emit(TokenEvent::Cleared(TokenChangeSource::External));
            }
            inner.token.clone_from(&persisted);
        }
        Ok(persisted)
    }

    /// Cookie first, then cache.
    fn clear_locked(
        &self,
        inner: &mut Inner,
        source: TokenChangeSource,
    ) -> Result<(), CookieError> {
        let cleared = self.cookies.clear();
        inner.bump();
        let had_token = inner.token.take().is_some();
        inner.cached = None;
        inner.force_refresh = false;
        self.set_state(SessionState::LoggedOut);
        if had_token {
            self.emit(TokenEvent::Cleared(source));
        }
        cleared
    }

    fn clear_or_log(&self, inner: &mut Inner, source: TokenChangeSource) {
        if let Err(err) = self.clear_locked(inner, source) {
            error!("Failed to clear persisted session: {err}");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = %current, to = %state, "session state change");
                *current = state;
                true
            }
        });
    }

    fn emit(&self, event: TokenEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}
