use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const CMD_ADMIN: &str = "admin";
pub const CMD_CREATE: &str = "create";
pub const CMD_LIST: &str = "list";
pub const CMD_RESET_CHALLENGE: &str = "reset-challenge";

pub const ARG_EMAIL: &str = "email";
pub const ARG_USERNAME: &str = "username";
pub const ARG_DISPLAY_NAME: &str = "display-name";
pub const ARG_PASSWORD: &str = "password";

/// Maintenance task selected under `admin`.
#[derive(Debug)]
pub enum Task {
    Create {
        email: String,
        username: String,
        display_name: String,
        password: SecretString,
    },
    List,
    ResetChallenge {
        email: String,
    },
}

impl Task {
    /// Parse the `admin` subcommand matches.
    ///
    /// # Errors
    /// Returns an error if no task was given or a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let required = |matches: &ArgMatches, id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        match matches.subcommand() {
            Some((CMD_CREATE, sub)) => {
                let username = required(sub, ARG_USERNAME)?;
                let display_name = sub
                    .get_one::<String>(ARG_DISPLAY_NAME)
                    .cloned()
                    .unwrap_or_else(|| username.clone());
                Ok(Self::Create {
                    email: required(sub, ARG_EMAIL)?,
                    username,
                    display_name,
                    password: SecretString::from(required(sub, ARG_PASSWORD)?),
                })
            }
            Some((CMD_LIST, _)) => Ok(Self::List),
            Some((CMD_RESET_CHALLENGE, sub)) => Ok(Self::ResetChallenge {
                email: required(sub, ARG_EMAIL)?,
            }),
            _ => anyhow::bail!(
                "missing admin task: {CMD_CREATE}, {CMD_LIST} or {CMD_RESET_CHALLENGE}"
            ),
        }
    }
}

#[must_use]
pub fn subcommand() -> Command {
    Command::new(CMD_ADMIN)
        .about("Manage admin accounts")
        .subcommand_required(true)
        .subcommand(
            Command::new(CMD_CREATE)
                .about("Create a verified admin account")
                .arg(
                    Arg::new(ARG_EMAIL)
                        .long(ARG_EMAIL)
                        .help("Admin email address")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_USERNAME)
                        .long(ARG_USERNAME)
                        .help("Admin username")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_DISPLAY_NAME)
                        .long(ARG_DISPLAY_NAME)
                        .help("Name shown in the admin UI (defaults to the username)"),
                )
                .arg(
                    Arg::new(ARG_PASSWORD)
                        .long(ARG_PASSWORD)
                        .help("Initial password")
                        .env("TURNSTILE_ADMIN_PASSWORD")
                        .hide_env_values(true)
                        .required(true),
                ),
        )
        .subcommand(Command::new(CMD_LIST).about("List admin accounts"))
        .subcommand(
            Command::new(CMD_RESET_CHALLENGE)
                .about("Clear the pending code of an account so a new one can be sent")
                .arg(
                    Arg::new(ARG_EMAIL)
                        .long(ARG_EMAIL)
                        .help("Account email address")
                        .required(true),
                ),
        )
}
