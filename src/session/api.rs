//! Remote collaborators of the session manager: credential exchange, identity
//! lookup and sign-out against the émargement REST backend.
//!
//! Every call carries the same timeout. Error bodies are trimmed and truncated
//! before they reach a user-facing message, and tokens never appear in logs.

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::errors::{ApiError, SessionError};
use super::types::{AuthToken, CurrentUser, Credentials, SignInResponse};
use crate::APP_USER_AGENT;

/// Default request timeout applied to every backend call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum number of error body characters surfaced to the user.
const MAX_ERROR_CHARS: usize = 200;

pub const SIGN_IN_PATH: &str = "/api/auth/signin";
pub const CURRENT_USER_PATH: &str = "/api/auth/me";
pub const SIGN_OUT_PATH: &str = "/api/auth/signout";

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a token and the signed-in user.
    ///
    /// # Errors
    /// `Authentication` for refused credentials, `RateLimited` on `429`,
    /// `Api` for anything else.
    async fn sign_in(&self, credentials: &Credentials) -> Result<SignInResponse, SessionError>;

    /// User behind the token, or `None` when the backend does not recognize it.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    async fn fetch_current_user(&self, token: &AuthToken)
        -> Result<Option<CurrentUser>, ApiError>;

    /// # Errors
    /// Transport failures and unexpected statuses.
    async fn sign_out(&self, token: &AuthToken) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct SignInBody {
    user: CurrentUser,
    token: String,
}

/// [`AuthApi`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    /// # Errors
    /// Returns `ApiError::Config` if the base URL is not an absolute http(s)
    /// URL or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let parsed = Url::parse(base_url.trim())
            .map_err(|err| ApiError::Config(format!("Invalid API URL {base_url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "Unsupported API URL scheme: {}",
                parsed.scheme()
            )));
        }

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| ApiError::Config(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim().trim_start_matches('/'))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    #[instrument(skip_all, fields(email = %credentials.email))]
    async fn sign_in(&self, credentials: &Credentials) -> Result<SignInResponse, SessionError> {
        let body = SignInRequest {
            email: &credentials.email,
            password: credentials.password.expose_secret(),
        };
        let response = self
            .client
            .post(self.url(SIGN_IN_PATH))
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if status.is_success() {
            let body: SignInBody = response
                .json()
                .await
                .map_err(|err| ApiError::Parse(format!("Failed to decode response: {err}")))?;
            return Ok(SignInResponse {
                user: body.user,
                token: AuthToken::new(body.token),
            });
        }

        let message = error_message(response).await;
        debug!(status = status.as_u16(), "sign-in refused");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SessionError::Authentication {
                    message: Some(message),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(SessionError::RateLimited { message }),
            _ => Err(ApiError::Http {
                status: status.as_u16(),
                message,
            }
            .into()),
        }
    }

    async fn fetch_current_user(
        &self,
        token: &AuthToken,
    ) -> Result<Option<CurrentUser>, ApiError> {
        let response = self
            .client
            .get(self.url(CURRENT_USER_PATH))
            .header(AUTHORIZATION, format!("Bearer {}", token.expose()))
            .send()
            .await
            .map_err(map_request_error)?;

        match response.status() {
            StatusCode::NO_CONTENT
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CurrentUser>()
                .await
                .map(Some)
                .map_err(|err| ApiError::Parse(format!("Failed to decode response: {err}"))),
            status => Err(ApiError::Http {
                status: status.as_u16(),
                message: error_message(response).await,
            }),
        }
    }

    async fn sign_out(&self, token: &AuthToken) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(SIGN_OUT_PATH))
            .header(AUTHORIZATION, format!("Bearer {}", token.expose()))
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Http {
                status: status.as_u16(),
                message: error_message(response).await,
            })
        }
    }
}

fn map_request_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout("Request timed out. Please try again.".to_string())
    } else if err.is_builder() {
        ApiError::Config(format!("Failed to build request: {err}"))
    } else {
        ApiError::Network(format!("Unable to reach the server: {err}"))
    }
}

/// Prefer the backend's `message` or `error` field over the raw body.
async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let extracted = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            ["message", "error"].iter().find_map(|field| {
                value
                    .get(field)
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
        });
    sanitize_body(&extracted.unwrap_or(body))
}

/// Trim and truncate error bodies for user-facing messages.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RATE_LIMIT_MESSAGE;
    use crate::session::types::Role;
    use anyhow::Result;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn user_json(role: &str) -> serde_json::Value {
        json!({
            "id": "u-42",
            "email": "prof@univ.fr",
            "name": "Claire Martin",
            "phone": null,
            "role": role,
            "createdAt": "2024-09-02T08:00:00Z",
            "updatedAt": "2024-09-02T08:00:00Z"
        })
    }

    fn api(server: &MockServer) -> Result<HttpAuthApi> {
        Ok(HttpAuthApi::new(&server.uri(), DEFAULT_TIMEOUT)?)
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            HttpAuthApi::new("ftp://example.com", DEFAULT_TIMEOUT),
            Err(ApiError::Config(_))
        ));
        assert!(matches!(
            HttpAuthApi::new("not a url", DEFAULT_TIMEOUT),
            Err(ApiError::Config(_))
        ));
    }

    #[test]
    fn url_joins_without_double_slashes() -> Result<()> {
        let api = HttpAuthApi::new("http://localhost:3000/", DEFAULT_TIMEOUT)?;
        assert_eq!(api.url(SIGN_IN_PATH), "http://localhost:3000/api/auth/signin");
        Ok(())
    }

    #[test]
    fn sanitize_body_trims_and_truncates() {
        assert_eq!(sanitize_body("  "), "Request failed.");
        assert_eq!(sanitize_body(" oops "), "oops");
        assert_eq!(sanitize_body(&"x".repeat(500)).chars().count(), MAX_ERROR_CHARS);
    }

    #[tokio::test]
    async fn sign_in_returns_user_and_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SIGN_IN_PATH))
            .and(body_json(json!({"email": "prof@univ.fr", "password": "hunter2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": user_json("TEACHER"),
                "token": "tok-1"
            })))
            .mount(&server)
            .await;

        let response = api(&server)?
            .sign_in(&Credentials::new("prof@univ.fr", "hunter2"))
            .await?;
        assert_eq!(response.token, AuthToken::from("tok-1"));
        assert_eq!(response.user.role, Role::Teacher);
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_maps_refusals() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SIGN_IN_PATH))
            .and(body_json(json!({"email": "prof@univ.fr", "password": "wrong"})))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid password"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(SIGN_IN_PATH))
            .and(body_json(json!({"email": "spam@univ.fr", "password": "x"})))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"error": RATE_LIMIT_MESSAGE})),
            )
            .mount(&server)
            .await;

        let api = api(&server)?;
        let refused = api
            .sign_in(&Credentials::new("prof@univ.fr", "wrong"))
            .await;
        assert!(matches!(
            refused,
            Err(SessionError::Authentication { message: Some(ref m) }) if m == "Invalid password"
        ));

        let limited = api.sign_in(&Credentials::new("spam@univ.fr", "x")).await;
        match limited {
            Err(err @ SessionError::RateLimited { .. }) => {
                assert_eq!(err.user_message(), RATE_LIMIT_MESSAGE);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_bad_request_is_not_a_credential_error() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SIGN_IN_PATH))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "Malformed body"})),
            )
            .mount(&server)
            .await;

        let result = api(&server)?
            .sign_in(&Credentials::new("prof@univ.fr", "hunter2"))
            .await;
        match result {
            Err(err @ SessionError::Api(ApiError::Http { status: 400, .. })) => {
                assert_eq!(
                    err.user_message(),
                    "Une erreur est survenue. Veuillez réessayer."
                );
            }
            other => panic!("expected an HTTP error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn fetch_current_user_sends_bearer() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CURRENT_USER_PATH))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("ADMIN")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CURRENT_USER_PATH))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = api(&server)?;
        let user = api.fetch_current_user(&AuthToken::from("tok-1")).await?;
        assert_eq!(user.map(|u| u.role), Some(Role::Admin));
        assert_eq!(api.fetch_current_user(&AuthToken::from("stale")).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_are_transient() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CURRENT_USER_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("  upstream down  "))
            .mount(&server)
            .await;

        let err = api(&server)?
            .fetch_current_user(&AuthToken::from("tok-1"))
            .await
            .err();
        assert_eq!(
            err,
            Some(ApiError::Http {
                status: 503,
                message: "upstream down".to_string()
            })
        );
        assert!(err.is_some_and(|e| e.is_transient()));
        Ok(())
    }

    #[tokio::test]
    async fn slow_backend_times_out() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CURRENT_USER_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(user_json("USER"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let api = HttpAuthApi::new(&server.uri(), Duration::from_millis(50))?;
        let err = api.fetch_current_user(&AuthToken::from("tok-1")).await.err();
        assert!(matches!(err, Some(ApiError::Timeout(_))));
        Ok(())
    }

    #[tokio::test]
    async fn sign_out_posts_bearer() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SIGN_OUT_PATH))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)?.sign_out(&AuthToken::from("tok-1")).await?;
        Ok(())
    }
}
