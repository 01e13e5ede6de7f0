use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::{env, path::PathBuf};

pub const CMD_LOGIN: &str = "login";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_WHOAMI: &str = "whoami";
pub const CMD_WATCH: &str = "watch";

pub const ARG_API_URL: &str = "api-url";
pub const ARG_COOKIE_JAR: &str = "cookie-jar";
pub const ARG_EMAIL: &str = "email";
pub const ARG_PASSWORD: &str = "password";

const COOKIE_JAR_FILE: &str = ".emargement/session.json";

/// Arguments shared by every session subcommand.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_url: String,
    pub cookie_jar: PathBuf,
}

impl ClientOptions {
    /// Parse the API URL and cookie jar location.
    ///
    /// # Errors
    /// Returns an error if the API URL is missing, or if no cookie jar was given
    /// and `HOME` is not set.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let api_url = match matches.get_one::<String>(ARG_API_URL) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => anyhow::bail!("missing required argument: --{ARG_API_URL}"),
        };

        let cookie_jar = match matches
            .get_one::<String>(ARG_COOKIE_JAR)
            .filter(|v| !v.trim().is_empty())
        {
            Some(path) => PathBuf::from(path),
            None => default_cookie_jar()
                .with_context(|| format!("missing --{ARG_COOKIE_JAR} and HOME is not set"))?,
        };

        Ok(Self {
            api_url,
            cookie_jar,
        })
    }
}

fn default_cookie_jar() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(COOKIE_JAR_FILE))
}

#[derive(Debug)]
pub struct LoginOptions {
    pub client: ClientOptions,
    pub email: String,
    pub password: SecretString,
}

impl LoginOptions {
    /// # Errors
    /// Returns an error if the email or password is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let client = ClientOptions::parse(matches)?;
        let email = matches
            .get_one::<String>(ARG_EMAIL)
            .cloned()
            .context("missing required argument: --email")?;
        let password = matches
            .get_one::<String>(ARG_PASSWORD)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --password")?;

        Ok(Self {
            client,
            email,
            password,
        })
    }
}

fn with_client_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_API_URL)
                .long(ARG_API_URL)
                .help("Base URL of the authentication API")
                .env("EMARGEMENT_API_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_COOKIE_JAR)
                .long(ARG_COOKIE_JAR)
                .help("File holding the session cookie (default: ~/.emargement/session.json)")
                .env("EMARGEMENT_COOKIE_JAR"),
        )
}

#[must_use]
pub fn login() -> Command {
    with_client_args(Command::new(CMD_LOGIN).about("Sign in and keep the session token"))
        .arg(
            Arg::new(ARG_EMAIL)
                .long(ARG_EMAIL)
                .short('e')
                .help("Account email")
                .env("EMARGEMENT_EMAIL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long(ARG_PASSWORD)
                .help("Account password, prefer the environment variable")
                .env("EMARGEMENT_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}

#[must_use]
pub fn logout() -> Command {
    with_client_args(Command::new(CMD_LOGOUT).about("Sign out and forget the session token"))
}

#[must_use]
pub fn whoami() -> Command {
    with_client_args(Command::new(CMD_WHOAMI).about("Show the signed-in user"))
}

#[must_use]
pub fn watch() -> Command {
    with_client_args(
        Command::new(CMD_WATCH).about("Print session changes until interrupted"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::ExposeSecret;

    #[test]
    fn login_options() -> Result<()> {
        let matches = login().try_get_matches_from(vec![
            "login",
            "--api-url",
            "http://localhost:3000/",
            "--cookie-jar",
            "/tmp/jar.json",
            "-e",
            "jean@example.com",
            "--password",
            "s3cret",
        ])?;
        let options = LoginOptions::parse(&matches)?;
        assert_eq!(options.client.api_url, "http://localhost:3000/");
        assert_eq!(options.client.cookie_jar, PathBuf::from("/tmp/jar.json"));
        assert_eq!(options.email, "jean@example.com");
        assert_eq!(options.password.expose_secret(), "s3cret");
        Ok(())
    }

    #[test]
    fn password_from_env() {
        temp_env::with_vars(
            [
                ("EMARGEMENT_API_URL", Some("http://api:3000")),
                ("EMARGEMENT_EMAIL", Some("claire@example.com")),
                ("EMARGEMENT_PASSWORD", Some("from-env")),
                ("EMARGEMENT_COOKIE_JAR", Some("/tmp/env-jar.json")),
            ],
            || {
                let options = login()
                    .try_get_matches_from(vec!["login"])
                    .map_err(anyhow::Error::from)
                    .and_then(|matches| LoginOptions::parse(&matches));
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.client.api_url, "http://api:3000");
                    assert_eq!(options.password.expose_secret(), "from-env");
                    assert_eq!(
                        options.client.cookie_jar,
                        PathBuf::from("/tmp/env-jar.json")
                    );
                }
            },
        );
    }

    #[test]
    fn cookie_jar_defaults_under_home() {
        temp_env::with_vars(
            [
                ("HOME", Some("/home/jean")),
                ("EMARGEMENT_COOKIE_JAR", None),
            ],
            || {
                let options = whoami()
                    .try_get_matches_from(vec!["whoami", "--api-url", "http://api"])
                    .map_err(anyhow::Error::from)
                    .and_then(|matches| ClientOptions::parse(&matches));
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(
                        options.cookie_jar,
                        PathBuf::from("/home/jean/.emargement/session.json")
                    );
                }
            },
        );
    }

    #[test]
    fn missing_home_without_jar_fails() {
        temp_env::with_vars_unset(["HOME", "EMARGEMENT_COOKIE_JAR"], || {
            let options = logout()
                .try_get_matches_from(vec!["logout", "--api-url", "http://api"])
                .map_err(anyhow::Error::from)
                .and_then(|matches| ClientOptions::parse(&matches));
            assert!(options.is_err_and(|e| e.to_string().contains("--cookie-jar")));
        });
    }

    #[test]
    fn api_url_is_required() {
        temp_env::with_vars_unset(["EMARGEMENT_API_URL"], || {
            assert!(watch().try_get_matches_from(vec!["watch"]).is_err());
        });
    }
}
