//! Client-side session: the persisted `auth-token` cookie, the backend
//! collaborators and the [`SessionManager`] tying them together.

pub mod api;
pub mod cookie;
pub mod errors;
pub mod manager;
pub mod types;
pub mod watcher;

pub use api::{AuthApi, HttpAuthApi};
pub use cookie::{FileCookieJar, MemoryCookieJar, TokenStore};
pub use errors::{ApiError, CookieError, SessionError};
pub use manager::{SessionConfig, SessionManager};
pub use types::{
    AuthToken, Credentials, CurrentUser, Role, SessionState, SignInResponse, TokenChangeSource,
    TokenEvent,
};
pub use watcher::TokenWatcher;
