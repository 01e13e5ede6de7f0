use crate::cli::actions::{server, session, Action};
use crate::cli::commands::{
    server::{Options as ServerOptions, CMD_SERVER},
    session::{ClientOptions, LoginOptions, CMD_LOGIN, CMD_LOGOUT, CMD_WATCH, CMD_WHOAMI},
};
use anyhow::{bail, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_SERVER, sub_m)) => {
            let options = ServerOptions::parse(sub_m)?;
            Ok(Action::Server(server::Args {
                port: options.port,
                upstream_url: options.upstream_url,
                rate_limit: options.rate_limit,
                sweep_interval: options.sweep_interval,
            }))
        }
        Some((CMD_LOGIN, sub_m)) => {
            let options = LoginOptions::parse(sub_m)?;
            Ok(Action::Login(session::LoginArgs {
                client: options.client.into(),
                email: options.email,
                password: options.password,
            }))
        }
        Some((CMD_LOGOUT, sub_m)) => Ok(Action::Logout(ClientOptions::parse(sub_m)?.into())),
        Some((CMD_WHOAMI, sub_m)) => Ok(Action::Whoami(ClientOptions::parse(sub_m)?.into())),
        Some((CMD_WATCH, sub_m)) => Ok(Action::Watch(ClientOptions::parse(sub_m)?.into())),
        Some((other, _)) => bail!("unknown command: {other}"),
        None => bail!("missing command"),
    }
}
