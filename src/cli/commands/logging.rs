use crate::cli::telemetry::LogFormat;
use clap::{builder::ValueParser, Arg, ArgMatches, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

/// Selected log output format, `pretty` unless `json` was asked for.
#[must_use]
pub fn format(matches: &ArgMatches) -> LogFormat {
    match matches.get_one::<String>(ARG_LOG_FORMAT).map(String::as_str) {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("TURNSTILE_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format")
                .env("TURNSTILE_LOG_FORMAT")
                .global(true)
                .default_value("pretty")
                .value_parser(["pretty", "json"]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_names_and_numbers() {
        let command = with_args(Command::new("test"));
        for (level, expected) in [("warn", 1), ("TRACE", 4), ("3", 3)] {
            temp_env::with_vars([("TURNSTILE_LOG_LEVEL", Some(level))], || {
                let matches = command.clone().get_matches_from(vec!["test"]);
                assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(expected));
            });
        }
    }

    #[test]
    fn log_format_default_and_json() {
        temp_env::with_vars([("TURNSTILE_LOG_FORMAT", None::<&str>)], || {
            let command = with_args(Command::new("test"));
            let matches = command.clone().get_matches_from(vec!["test"]);
            assert_eq!(format(&matches), LogFormat::Pretty);

            let matches = command.get_matches_from(vec!["test", "--log-format", "json"]);
            assert_eq!(format(&matches), LogFormat::Json);
        });
    }
}
