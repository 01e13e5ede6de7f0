use crate::cli::actions::{server, session, Action};
use anyhow::Result;

/// Execute the provided action.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::Login(args) => session::login(args).await,
        Action::Logout(args) => session::logout(args).await,
        Action::Whoami(args) => session::whoami(args).await,
        Action::Watch(args) => session::watch(args).await,
    }
}
