//! Persistence of the `auth-token` cookie.
//!
//! The persisted copy is the durable one; the session manager only mirrors it.
//! Writers race last-write-wins, matching how a browser cookie jar behaves.
//! File writes are replaced atomically so a concurrent reader never sees a
//! partial jar.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::debug;

use super::errors::CookieError;
use super::types::AuthToken;

pub const AUTH_COOKIE_NAME: &str = "auth-token";
/// Session cookie lifetime: 7 days.
pub const SESSION_EXPIRY_SECONDS: u64 = 604_800;
pub const EXPIRED_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// `Set-Cookie` value persisting the token.
#[must_use]
pub fn session_cookie(token: &AuthToken, max_age: Duration) -> String {
    format!(
        "{AUTH_COOKIE_NAME}={}; path=/; max-age={}; SameSite=Lax",
        token.expose(),
        max_age.as_secs()
    )
}

/// `Set-Cookie` value expiring the token.
#[must_use]
pub fn clear_session_cookie() -> String {
    format!("{AUTH_COOKIE_NAME}=; path=/; expires={EXPIRED_DATE}; SameSite=Lax")
}

/// Durable home of the auth token.
pub trait TokenStore: Send + Sync {
    /// Current token, or `None` when absent or expired.
    ///
    /// # Errors
    /// Returns an error if the jar cannot be read.
    fn load(&self) -> Result<Option<AuthToken>, CookieError>;

    /// # Errors
    /// Returns an error if the jar cannot be written.
    fn store(&self, token: &AuthToken, max_age: Duration) -> Result<(), CookieError>;

    /// Expire the token. Clearing an empty jar is not an error.
    ///
    /// # Errors
    /// Returns an error if the jar cannot be written.
    fn clear(&self) -> Result<(), CookieError>;
}

/// On-disk form of the cookie, with an absolute expiry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    path: String,
    same_site: String,
    expires_at: DateTime<Utc>,
}

impl StoredCookie {
    fn new(token: &AuthToken, max_age: Duration, now: DateTime<Utc>) -> Self {
        let seconds = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let expires_at = ChronoDuration::try_seconds(seconds)
            .and_then(|age| now.checked_add_signed(age))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            name: AUTH_COOKIE_NAME.to_string(),
            value: token.expose().to_string(),
            path: "/".to_string(),
            same_site: "Lax".to_string(),
            expires_at,
        }
    }

    fn live_token(&self, now: DateTime<Utc>) -> Option<AuthToken> {
        (self.name == AUTH_COOKIE_NAME && !self.value.is_empty() && now < self.expires_at)
            .then(|| AuthToken::new(self.value.clone()))
    }
}

#[derive(Debug, Default)]
struct MemoryJarState {
    cookie: Option<StoredCookie>,
    last_set_cookie: Option<String>,
}

/// In-process jar, used by tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    state: Mutex<MemoryJarState>,
}

impl MemoryCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `Set-Cookie` value this jar would have sent.
    #[must_use]
    pub fn last_set_cookie(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_set_cookie
            .clone()
    }
}

impl TokenStore for MemoryCookieJar {
    fn load(&self) -> Result<Option<AuthToken>, CookieError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .cookie
            .as_ref()
            .and_then(|cookie| cookie.live_token(Utc::now())))
    }

    fn store(&self, token: &AuthToken, max_age: Duration) -> Result<(), CookieError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.cookie = Some(StoredCookie::new(token, max_age, Utc::now()));
        state.last_set_cookie = Some(session_cookie(token, max_age));
        Ok(())
    }

    fn clear(&self) -> Result<(), CookieError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.cookie = None;
        state.last_set_cookie = Some(clear_session_cookie());
        Ok(())
    }
}

/// JSON cookie jar on disk, shared by every CLI invocation using the same path.
#[derive(Clone, Debug)]
pub struct FileCookieJar {
    path: PathBuf,
}

impl FileCookieJar {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // Readers see either the previous file or the complete new one.
    fn write(&self, contents: &[u8]) -> Result<(), CookieError> {
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(contents)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl TokenStore for FileCookieJar {
    fn load(&self) -> Result<Option<AuthToken>, CookieError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let cookie: StoredCookie = serde_json::from_str(&contents)
            .map_err(|err| CookieError::Corrupt(format!("{}: {err}", self.path.display())))?;
        let token = cookie.live_token(Utc::now());
        if token.is_none() {
            debug!(path = %self.path.display(), "auth cookie expired");
        }
        Ok(token)
    }

    fn store(&self, token: &AuthToken, max_age: Duration) -> Result<(), CookieError> {
        let cookie = StoredCookie::new(token, max_age, Utc::now());
        let contents = serde_json::to_vec_pretty(&cookie)
            .map_err(|err| CookieError::Corrupt(err.to_string()))?;
        self.write(&contents)
    }

    fn clear(&self) -> Result<(), CookieError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
