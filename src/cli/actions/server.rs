use crate::{
    api::{self, Storage},
    email::EmailConfig,
    model::Role,
    otp::DispatchPolicy,
    service::{AuthConfig, Secrets},
};
use anyhow::Result;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub storage: Storage,
    pub auth_config: AuthConfig,
    pub email_config: EmailConfig,
    pub secrets: Secrets,
}

/// Execute the server action.
/// # Errors
/// Returns an error if storage cannot be opened or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    api::new(
        args.port,
        args.storage,
        args.auth_config,
        args.email_config,
        args.secrets,
    )
    .await
}

fn log_startup_args(args: &Args) {
    let storage = match &args.storage {
        Storage::Memory => "memory".to_string(),
        Storage::Postgres { dsn } => redact_dsn(dsn),
    };
    let mail = args
        .email_config
        .endpoint()
        .map_or_else(|| "log (development)".to_string(), ToString::to_string);
    let dispatch = match args.auth_config.dispatch_policy() {
        DispatchPolicy::Strict => "strict",
        DispatchPolicy::BestEffort => "best-effort",
    };
    let requests = args.auth_config.request_limit();
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("storage", storage),
        ("frontend", args.auth_config.frontend_base_url().to_string()),
        ("mail", mail),
        ("dispatch_policy", dispatch.to_string()),
        (
            "admin_session_ttl",
            format!("{}s", args.auth_config.session_ttl_seconds(Role::Admin)),
        ),
        (
            "request_limit",
            format!("{}/{}s", requests.max, requests.window.num_seconds()),
        ),
        (
            "token_seed_set",
            args.secrets.token_seed.is_some().to_string(),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed).to_string()
}

const BANNER: &str = r"
  _|_|_|_|_|
      |  |
  ----+--+----  T U R N S T I L E {VERSION}
      |  |
  _|_|_|_|_|";
