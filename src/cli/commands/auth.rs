use crate::{
    credential::HashCost,
    limit::WindowLimit,
    model::Role,
    otp::{ChallengePolicy, DispatchPolicy},
    service::{AuthConfig, ChallengeFlow, Secrets},
};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_PEPPER: &str = "pepper";
pub const ARG_TOKEN_SEED: &str = "token-seed";
pub const ARG_MIN_PASSWORD_LENGTH: &str = "min-password-length";
pub const ARG_DISPATCH_POLICY: &str = "dispatch-policy";
pub const ARG_DISPATCH_TIMEOUT_SECONDS: &str = "dispatch-timeout-seconds";
pub const ARG_REWARD_COOLDOWN_SECONDS: &str = "reward-cooldown-seconds";
pub const ARG_ARGON2_MEMORY_KIB: &str = "argon2-memory-kib";
pub const ARG_ARGON2_ITERATIONS: &str = "argon2-iterations";
pub const ARG_ARGON2_PARALLELISM: &str = "argon2-parallelism";
pub const ARG_VERIFY_ATTEMPT_LIMIT: &str = "verify-attempt-limit";
pub const ARG_VERIFY_LOCKOUT_SECONDS: &str = "verify-lockout-seconds";
pub const ARG_REQUEST_LIMIT: &str = "request-limit";
pub const ARG_REQUEST_WINDOW_SECONDS: &str = "request-window-seconds";
pub const ARG_REWARD_REQUEST_LIMIT: &str = "reward-request-limit";
pub const ARG_REWARD_REQUEST_WINDOW_SECONDS: &str = "reward-request-window-seconds";

/// `(flow, cooldown arg, ttl arg)` for every flow with its own policy.
const FLOW_ARGS: [(ChallengeFlow, &str, &str); 6] = [
    (
        ChallengeFlow::AdminLogin,
        "admin-login-cooldown-seconds",
        "admin-login-ttl-seconds",
    ),
    (
        ChallengeFlow::AdminResend,
        "admin-resend-cooldown-seconds",
        "admin-resend-ttl-seconds",
    ),
    (
        ChallengeFlow::VendorLogin,
        "vendor-cooldown-seconds",
        "vendor-ttl-seconds",
    ),
    (
        ChallengeFlow::VendorResend,
        "vendor-cooldown-seconds",
        "vendor-ttl-seconds",
    ),
    (
        ChallengeFlow::Registration,
        "registration-cooldown-seconds",
        "registration-ttl-seconds",
    ),
    (
        ChallengeFlow::PasswordReset,
        "reset-cooldown-seconds",
        "reset-ttl-seconds",
    ),
];

const SESSION_ARGS: [(Role, &str); 3] = [
    (Role::Admin, "admin-session-ttl-seconds"),
    (Role::Vendor, "vendor-session-ttl-seconds"),
    (Role::User, "user-session-ttl-seconds"),
];

#[derive(Debug, Clone)]
pub struct Options {
    pub config: AuthConfig,
    pub secrets: Secrets,
}

impl Options {
    /// Parse flow, session and secret arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the pepper is missing or the dispatch policy is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let pepper = matches
            .get_one::<String>(ARG_PEPPER)
            .filter(|value| !value.trim().is_empty())
            .map(|value| SecretString::from(value.clone()));
        let Some(pepper) = pepper else {
            anyhow::bail!("missing required argument: --{ARG_PEPPER}");
        };
        let token_seed = matches
            .get_one::<String>(ARG_TOKEN_SEED)
            .filter(|value| !value.trim().is_empty())
            .map(|value| SecretString::from(value.clone()));

        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .cloned()
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        let mut config = AuthConfig::new(frontend_base_url);

        for (flow, cooldown_arg, ttl_arg) in FLOW_ARGS {
            let defaults = config.policy(flow);
            let cooldown = matches
                .get_one::<i64>(cooldown_arg)
                .copied()
                .unwrap_or_else(|| defaults.cooldown.num_seconds());
            let ttl = matches
                .get_one::<i64>(ttl_arg)
                .copied()
                .unwrap_or_else(|| defaults.ttl.num_seconds());
            config = config.with_policy(flow, ChallengePolicy::from_seconds(cooldown, ttl));
        }

        for (role, arg) in SESSION_ARGS {
            if let Some(seconds) = matches.get_one::<i64>(arg) {
                config = config.with_session_ttl_seconds(role, *seconds);
            }
        }

        if let Some(length) = matches.get_one::<usize>(ARG_MIN_PASSWORD_LENGTH) {
            config = config.with_min_password_length(*length);
        }
        if let Some(policy) = matches.get_one::<String>(ARG_DISPATCH_POLICY) {
            let policy = policy
                .parse::<DispatchPolicy>()
                .map_err(|err| anyhow::anyhow!(err))?;
            config = config.with_dispatch_policy(policy);
        }
        if let Some(seconds) = matches.get_one::<u64>(ARG_DISPATCH_TIMEOUT_SECONDS) {
            config = config.with_dispatch_timeout_seconds(*seconds);
        }
        if let Some(seconds) = matches.get_one::<i64>(ARG_REWARD_COOLDOWN_SECONDS) {
            config = config.with_reward_cooldown_seconds(*seconds);
        }

        let attempts = matches
            .get_one::<u32>(ARG_VERIFY_ATTEMPT_LIMIT)
            .copied()
            .unwrap_or_else(|| config.verify_attempt_limit());
        let lockout = matches
            .get_one::<i64>(ARG_VERIFY_LOCKOUT_SECONDS)
            .copied()
            .unwrap_or_else(|| config.verify_lockout().num_seconds());
        config = config.with_verify_attempts(attempts, lockout);
        let general = window_limit(
            matches,
            ARG_REQUEST_LIMIT,
            ARG_REQUEST_WINDOW_SECONDS,
            config.request_limit(),
        );
        let rewards = window_limit(
            matches,
            ARG_REWARD_REQUEST_LIMIT,
            ARG_REWARD_REQUEST_WINDOW_SECONDS,
            config.reward_request_limit(),
        );
        config = config
            .with_request_limit(general)
            .with_reward_request_limit(rewards);

        let defaults = HashCost::default();
        config = config.with_hash_cost(HashCost {
            memory_kib: matches
                .get_one::<u32>(ARG_ARGON2_MEMORY_KIB)
                .copied()
                .unwrap_or(defaults.memory_kib),
            iterations: matches
                .get_one::<u32>(ARG_ARGON2_ITERATIONS)
                .copied()
                .unwrap_or(defaults.iterations),
            parallelism: matches
                .get_one::<u32>(ARG_ARGON2_PARALLELISM)
                .copied()
                .unwrap_or(defaults.parallelism),
        });

        Ok(Self {
            config,
            secrets: Secrets { pepper, token_seed },
        })
    }
}

fn window_limit(
    matches: &ArgMatches,
    max_arg: &str,
    window_arg: &str,
    defaults: WindowLimit,
) -> WindowLimit {
    WindowLimit::from_seconds(
        matches
            .get_one::<u32>(max_arg)
            .copied()
            .unwrap_or(defaults.max),
        matches
            .get_one::<i64>(window_arg)
            .copied()
            .unwrap_or_else(|| defaults.window.num_seconds()),
    )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_secret_args(command);
    let command = with_challenge_args(command);
    let command = with_session_args(command);
    let command = with_limit_args(command);
    with_hash_args(command)
}

fn with_secret_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for mail links and CORS")
                .env("TURNSTILE_FRONTEND_BASE_URL")
                .global(true)
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_PEPPER)
                .long(ARG_PEPPER)
                .help("Server-side pepper mixed into password and code digests")
                .env("TURNSTILE_PEPPER")
                .global(true)
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_SEED)
                .long(ARG_TOKEN_SEED)
                .help("Base64 Ed25519 seed for session tokens (ephemeral when unset)")
                .env("TURNSTILE_TOKEN_SEED")
                .global(true)
                .hide_env_values(true),
        )
}

fn with_challenge_args(command: Command) -> Command {
    let specs = [
        (
            "admin-login-cooldown-seconds",
            "TURNSTILE_ADMIN_LOGIN_COOLDOWN_SECONDS",
            "1800",
            "Cooldown between admin login codes",
        ),
        (
            "admin-login-ttl-seconds",
            "TURNSTILE_ADMIN_LOGIN_TTL_SECONDS",
            "300",
            "Lifetime of an admin login code",
        ),
        (
            "admin-resend-cooldown-seconds",
            "TURNSTILE_ADMIN_RESEND_COOLDOWN_SECONDS",
            "60",
            "Cooldown between admin code resends",
        ),
        (
            "admin-resend-ttl-seconds",
            "TURNSTILE_ADMIN_RESEND_TTL_SECONDS",
            "60",
            "Lifetime of a resent admin code",
        ),
        (
            "vendor-cooldown-seconds",
            "TURNSTILE_VENDOR_COOLDOWN_SECONDS",
            "60",
            "Cooldown between vendor login codes",
        ),
        (
            "vendor-ttl-seconds",
            "TURNSTILE_VENDOR_TTL_SECONDS",
            "300",
            "Lifetime of a vendor login code",
        ),
        (
            "registration-cooldown-seconds",
            "TURNSTILE_REGISTRATION_COOLDOWN_SECONDS",
            "60",
            "Cooldown between email verification codes",
        ),
        (
            "registration-ttl-seconds",
            "TURNSTILE_REGISTRATION_TTL_SECONDS",
            "3600",
            "Lifetime of an email verification code",
        ),
        (
            "reset-cooldown-seconds",
            "TURNSTILE_RESET_COOLDOWN_SECONDS",
            "60",
            "Cooldown between password reset codes",
        ),
        (
            "reset-ttl-seconds",
            "TURNSTILE_RESET_TTL_SECONDS",
            "3600",
            "Lifetime of a password reset code",
        ),
    ];

    specs
        .into_iter()
        .fold(command, |command, (name, env, default, help)| {
            command.arg(
                Arg::new(name)
                    .long(name)
                    .help(help)
                    .env(env)
                    .global(true)
                    .default_value(default)
                    .value_parser(clap::value_parser!(i64).range(0..)),
            )
        })
        .arg(
            Arg::new(ARG_DISPATCH_POLICY)
                .long(ARG_DISPATCH_POLICY)
                .help("On a failed code email: roll back (strict) or keep the code (best-effort)")
                .env("TURNSTILE_DISPATCH_POLICY")
                .global(true)
                .default_value("strict")
                .value_parser(["strict", "best-effort"]),
        )
        .arg(
            Arg::new(ARG_DISPATCH_TIMEOUT_SECONDS)
                .long(ARG_DISPATCH_TIMEOUT_SECONDS)
                .help("Upper bound on a single code email send")
                .env("TURNSTILE_DISPATCH_TIMEOUT_SECONDS")
                .global(true)
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REWARD_COOLDOWN_SECONDS)
                .long(ARG_REWARD_COOLDOWN_SECONDS)
                .help("Cooldown between daily reward claims")
                .env("TURNSTILE_REWARD_COOLDOWN_SECONDS")
                .global(true)
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("admin-session-ttl-seconds")
                .long("admin-session-ttl-seconds")
                .help("Admin session lifetime")
                .env("TURNSTILE_ADMIN_SESSION_TTL_SECONDS")
                .global(true)
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("vendor-session-ttl-seconds")
                .long("vendor-session-ttl-seconds")
                .help("Vendor session lifetime")
                .env("TURNSTILE_VENDOR_SESSION_TTL_SECONDS")
                .global(true)
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("user-session-ttl-seconds")
                .long("user-session-ttl-seconds")
                .help("User session lifetime")
                .env("TURNSTILE_USER_SESSION_TTL_SECONDS")
                .global(true)
                .default_value("1296000")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MIN_PASSWORD_LENGTH)
                .long(ARG_MIN_PASSWORD_LENGTH)
                .help("Minimum accepted password length")
                .env("TURNSTILE_MIN_PASSWORD_LENGTH")
                .global(true)
                .default_value("6")
                .value_parser(clap::value_parser!(usize)),
        )
}

fn with_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFY_ATTEMPT_LIMIT)
                .long(ARG_VERIFY_ATTEMPT_LIMIT)
                .help("Wrong codes in a row before verification locks")
                .env("TURNSTILE_VERIFY_ATTEMPT_LIMIT")
                .global(true)
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_VERIFY_LOCKOUT_SECONDS)
                .long(ARG_VERIFY_LOCKOUT_SECONDS)
                .help("How long verification stays locked")
                .env("TURNSTILE_VERIFY_LOCKOUT_SECONDS")
                .global(true)
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REQUEST_LIMIT)
                .long(ARG_REQUEST_LIMIT)
                .help("Requests per client and window")
                .env("TURNSTILE_REQUEST_LIMIT")
                .global(true)
                .default_value("100")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_REQUEST_WINDOW_SECONDS)
                .long(ARG_REQUEST_WINDOW_SECONDS)
                .help("Window for the per-client request limit")
                .env("TURNSTILE_REQUEST_WINDOW_SECONDS")
                .global(true)
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REWARD_REQUEST_LIMIT)
                .long(ARG_REWARD_REQUEST_LIMIT)
                .help("Reward requests per client and window")
                .env("TURNSTILE_REWARD_REQUEST_LIMIT")
                .global(true)
                .default_value("20")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_REWARD_REQUEST_WINDOW_SECONDS)
                .long(ARG_REWARD_REQUEST_WINDOW_SECONDS)
                .help("Window for the per-client reward request limit")
                .env("TURNSTILE_REWARD_REQUEST_WINDOW_SECONDS")
                .global(true)
                .default_value("60")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_hash_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ARGON2_MEMORY_KIB)
                .long(ARG_ARGON2_MEMORY_KIB)
                .help("Argon2id memory cost in KiB")
                .env("TURNSTILE_ARGON2_MEMORY_KIB")
                .global(true)
                .default_value("19456")
                .value_parser(clap::value_parser!(u32).range(8..)),
        )
        .arg(
            Arg::new(ARG_ARGON2_ITERATIONS)
                .long(ARG_ARGON2_ITERATIONS)
                .help("Argon2id iterations")
                .env("TURNSTILE_ARGON2_ITERATIONS")
                .global(true)
                .default_value("2")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_ARGON2_PARALLELISM)
                .long(ARG_ARGON2_PARALLELISM)
                .help("Argon2id lanes")
                .env("TURNSTILE_ARGON2_PARALLELISM")
                .global(true)
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}
