use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Build the filter: `RUST_LOG` directives win, the verbosity level is the fallback.
fn filter(verbosity_level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?))
}

/// Initialize logging
///
/// # Errors
///
/// Returns an error if the subscriber is already set or a directive is invalid
pub fn init(verbosity_level: Option<Level>, format: LogFormat) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(Level::ERROR);
    let filter = filter(verbosity_level)?;

    match format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_target(false)
                .pretty();
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(false);
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_uses_verbosity_without_rust_log() {
        temp_env::with_vars([("RUST_LOG", None::<&str>)], || {
            let filter = filter(Level::DEBUG);
            assert!(filter.is_ok());
            if let Ok(filter) = filter {
                let rendered = filter.to_string();
                assert!(rendered.contains("debug"));
                assert!(rendered.contains("hyper=error"));
            }
        });
    }

    #[test]
    fn filter_prefers_rust_log() {
        temp_env::with_vars([("RUST_LOG", Some("turnstile=trace"))], || {
            let filter = filter(Level::ERROR);
            assert!(filter.is_ok_and(|filter| filter.to_string().contains("turnstile=trace")));
        });
    }
}
