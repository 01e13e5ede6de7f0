use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    Teacher,
    Supervisor,
    Delegate,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
            Self::Teacher => "TEACHER",
            Self::Supervisor => "SUPERVISOR",
            Self::Delegate => "DELEGATE",
        };
        f.write_str(label)
    }
}

/// Authenticated user as returned by the identity endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Opaque bearer token. `Debug` never prints the value.
#[derive(Debug)]
pub struct AuthToken(SecretString);

impl AuthToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl Clone for AuthToken {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for AuthToken {}

impl From<String> for AuthToken {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for AuthToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Result of a successful credential exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct SignInResponse {
    pub user: CurrentUser,
    pub token: AuthToken,
}

/// Client session lifecycle.
///
/// `Verifying` carries the optimistic user from the credential exchange until
/// the identity endpoint confirms it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    LoggedOut,
    Authenticating,
    Verifying {
        user: CurrentUser,
    },
    LoggedIn {
        user: CurrentUser,
    },
}

impl SessionState {
    #[must_use]
    pub fn user(&self) -> Option<&CurrentUser> {
        match self {
            Self::Verifying { user } | Self::LoggedIn { user } => Some(user),
            Self::LoggedOut | Self::Authenticating => None,
        }
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Verifying { user } => write!(f, "verifying {}", user.email),
            Self::LoggedIn { user } => write!(f, "logged in as {} ({})", user.email, user.role),
        }
    }
}

/// Why the persisted token changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenChangeSource {
    SignIn,
    SignOut,
    /// The identity endpoint refused the token.
    Rejected,
    /// Observed by polling: changed outside this manager.
    External,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenEvent {
    Stored(TokenChangeSource),
    Cleared(TokenChangeSource),
}

/// Basic email format check, run before contacting the credential exchange.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}
