//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an action: the API server when no subcommand
//! is given, otherwise one of the `admin` maintenance tasks.

use crate::cli::actions::{admin, server, Action};
use crate::cli::commands::{self, auth, email, storage};
use anyhow::Result;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let storage_opts = storage::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    if let Some(admin_matches) = matches.subcommand_matches(commands::admin::CMD_ADMIN) {
        let task = commands::admin::Task::parse(admin_matches)?;
        return Ok(Action::Admin(admin::Args {
            storage: storage_opts.storage,
            auth_config: auth_opts.config,
            secrets: auth_opts.secrets,
            task,
        }));
    }

    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let email_opts = email::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port,
        storage: storage_opts.storage,
        auth_config: auth_opts.config,
        email_config: email_opts.config,
        secrets: auth_opts.secrets,
    }))
}
