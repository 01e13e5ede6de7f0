use crate::cli::commands::session::ClientOptions;
use crate::session::{
    api::DEFAULT_TIMEOUT, Credentials, CurrentUser, FileCookieJar, HttpAuthApi, SessionConfig,
    SessionManager, SessionState, TokenWatcher,
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{path::PathBuf, sync::Arc};
use tokio::signal;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ClientArgs {
    pub api_url: String,
    pub cookie_jar: PathBuf,
}

impl From<ClientOptions> for ClientArgs {
    fn from(options: ClientOptions) -> Self {
        Self {
            api_url: options.api_url,
            cookie_jar: options.cookie_jar,
        }
    }
}

#[derive(Debug)]
pub struct LoginArgs {
    pub client: ClientArgs,
    pub email: String,
    pub password: SecretString,
}

fn manager(args: &ClientArgs) -> Result<Arc<SessionManager>> {
    let api = HttpAuthApi::new(&args.api_url, DEFAULT_TIMEOUT)
        .with_context(|| format!("invalid --api-url: {}", args.api_url))?;
    let jar = FileCookieJar::new(&args.cookie_jar);
    debug!(jar = %jar.path().display(), api = api.base_url(), "session client");
    Ok(Arc::new(SessionManager::new(
        Arc::new(api),
        Arc::new(jar),
        SessionConfig::new(),
    )))
}

fn describe(user: &CurrentUser) -> String {
    format!("{} <{}> ({})", user.name, user.email, user.role)
}

/// Sign in and print the confirmed user.
/// # Errors
/// Returns the user-facing message when the sign-in fails.
pub async fn login(args: LoginArgs) -> Result<()> {
    let manager = manager(&args.client)?;
    let credentials = Credentials::new(args.email, args.password.expose_secret());

    match manager.sign_in(credentials).await {
        Ok(_) => {
            let state = manager.state();
            match state.user() {
                Some(user) => println!("Signed in as {}", describe(user)),
                None => println!("{state}"),
            }
            Ok(())
        }
        Err(err) => {
            debug!("sign in failed: {err}");
            Err(anyhow!(err.user_message()))
        }
    }
}

/// # Errors
/// Returns an error if the local session cannot be cleared.
pub async fn logout(args: ClientArgs) -> Result<()> {
    let manager = manager(&args)?;
    manager
        .sign_out()
        .await
        .map_err(|err| anyhow!(err.user_message()))?;
    println!("Signed out");
    Ok(())
}

/// # Errors
/// Returns an error if the session could not be verified.
pub async fn whoami(args: ClientArgs) -> Result<()> {
    let manager = manager(&args)?;
    match manager
        .current_user()
        .await
        .map_err(|err| anyhow!(err.user_message()))?
    {
        Some(user) => println!("{}", describe(&user)),
        None => println!("Not signed in"),
    }
    Ok(())
}

/// Print every session state change until Ctrl+C.
/// # Errors
/// Returns an error if the initial session check fails.
pub async fn watch(args: ClientArgs) -> Result<()> {
    let manager = manager(&args)?;
    let mut states = manager.subscribe();

    if let Err(err) = manager.current_user().await {
        println!("{}", err.user_message());
    }
    print_state(&states.borrow_and_update().clone());

    let watcher = TokenWatcher::spawn(manager.clone());
    info!(jar = %args.cookie_jar.display(), "watching session");

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_state(&state);
            }
            _ = signal::ctrl_c() => {
                info!("ctrl_c signal received");
                break;
            }
        }
    }

    watcher.stop();
    Ok(())
}

fn print_state(state: &SessionState) {
    match state.user() {
        Some(user) => println!("{state}: {}", describe(user)),
        None => println!("{state}"),
    }
}
