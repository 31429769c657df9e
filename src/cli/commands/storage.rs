use crate::api::Storage;
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_DSN: &str = "dsn";
pub const ARG_MEMORY: &str = "memory";

#[derive(Debug, Clone)]
pub struct Options {
    pub storage: Storage,
}

impl Options {
    /// Parse storage arguments from matches.
    ///
    /// # Errors
    /// Returns an error if neither a DSN nor in-memory mode was selected.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        if matches.get_flag(ARG_MEMORY) {
            return Ok(Self {
                storage: Storage::Memory,
            });
        }

        let dsn = matches
            .get_one::<String>(ARG_DSN)
            .cloned()
            .filter(|value| !value.trim().is_empty());
        match dsn {
            Some(dsn) => Ok(Self {
                storage: Storage::Postgres { dsn },
            }),
            None => anyhow::bail!("missing required argument: --{ARG_DSN} (or --{ARG_MEMORY})"),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "Postgres connection string. The schema is applied on startup and \
                     every statement is idempotent.",
                )
                .env("TURNSTILE_DSN")
                .global(true)
                .conflicts_with(ARG_MEMORY),
        )
        .arg(
            Arg::new(ARG_MEMORY)
                .long(ARG_MEMORY)
                .help("Keep accounts and rewards in process memory (development only)")
                .env("TURNSTILE_MEMORY")
                .global(true)
                .action(ArgAction::SetTrue),
        )
}
