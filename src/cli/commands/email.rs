use crate::email::EmailConfig;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_EMAIL_ENDPOINT: &str = "email-endpoint";
pub const ARG_EMAIL_API_KEY: &str = "email-api-key";
pub const ARG_EMAIL_FROM: &str = "email-from";
pub const ARG_EMAIL_TIMEOUT_SECONDS: &str = "email-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: EmailConfig,
}

impl Options {
    /// Parse email delivery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the endpoint is not a valid URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let endpoint = matches
            .get_one::<String>(ARG_EMAIL_ENDPOINT)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(Url::parse)
            .transpose()
            .map_err(|err| anyhow::anyhow!("invalid --{ARG_EMAIL_ENDPOINT}: {err}"))?;

        let api_key = matches
            .get_one::<String>(ARG_EMAIL_API_KEY)
            .filter(|value| !value.trim().is_empty())
            .map(|value| SecretString::from(value.clone()));

        let mut config = EmailConfig::new()
            .with_endpoint(endpoint)
            .with_api_key(api_key);
        if let Some(from) = matches.get_one::<String>(ARG_EMAIL_FROM) {
            config = config.with_from_address(from.clone());
        }
        if let Some(seconds) = matches.get_one::<u64>(ARG_EMAIL_TIMEOUT_SECONDS) {
            config = config.with_timeout_seconds(*seconds);
        }

        Ok(Self { config })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_ENDPOINT)
                .long(ARG_EMAIL_ENDPOINT)
                .help("HTTP endpoint of the mail API; codes are only logged when unset")
                .env("TURNSTILE_EMAIL_ENDPOINT"),
        )
        .arg(
            Arg::new(ARG_EMAIL_API_KEY)
                .long(ARG_EMAIL_API_KEY)
                .help("Bearer token for the mail API")
                .env("TURNSTILE_EMAIL_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender address for outgoing mail")
                .env("TURNSTILE_EMAIL_FROM")
                .default_value("Turnstile <no-reply@turnstile.dev>"),
        )
        .arg(
            Arg::new(ARG_EMAIL_TIMEOUT_SECONDS)
                .long(ARG_EMAIL_TIMEOUT_SECONDS)
                .help("Timeout for a single mail API request")
                .env("TURNSTILE_EMAIL_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
