pub mod server;
pub mod session;

// The match over `Action` lives in `run` so this file only lists the variants.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Login(session::LoginArgs),
    Logout(session::ClientArgs),
    Whoami(session::ClientArgs),
    Watch(session::ClientArgs),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
