use thiserror::Error;

use crate::auth::RATE_LIMIT_MESSAGE;

/// Transport and HTTP failures talking to the backend.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("Response error: {0}")]
    Parse(String),
}

impl ApiError {
    /// Failures worth one more try: the backend may answer next time.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Config(_) | Self::Parse(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie jar I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cookie jar is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad credentials, or the identity endpoint refused the new token.
    #[error("authentication failed{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Authentication { message: Option<String> },
    #[error("rate limited: {message}")]
    RateLimited { message: String },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Cookie(#[from] CookieError),
}

impl SessionError {
    /// Message safe to show to the person signing in.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication { .. } => "Identifiants incorrects".to_string(),
            Self::RateLimited { message } => {
                if message.trim().is_empty() {
                    RATE_LIMIT_MESSAGE.to_string()
                } else {
                    message.clone()
                }
            }
            Self::Validation(message) => message.clone(),
            Self::Api(_) | Self::Cookie(_) => {
                "Une erreur est survenue. Veuillez réessayer.".to_string()
            }
        }
    }
}
