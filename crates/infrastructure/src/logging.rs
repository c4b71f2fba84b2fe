//! Structured logging for the npset agent.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

/// Default filter directives: the agent's own crates log at the
/// configured level, dependencies only at `warn` and above. `RUST_LOG`
/// overrides the whole filter when set.
fn default_directives(level: LogLevel) -> String {
    let level = level.as_str();
    format!("warn,agent={level},application={level},domain={level},infrastructure={level},ports={level}")
}

/// Initialize structured logging to stdout.
///
/// - `LogFormat::Json`: flattened JSON for log aggregators.
/// - `LogFormat::Text`: human-readable colored output for development.
///
/// Fails if a global subscriber is already installed, so the agent
/// cannot silently double-initialize.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().pretty().with_target(true).with_ansi(true))
            .try_init(),
    };

    result.map_err(|e| ConfigError::Validation {
        field: "logging".to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse_for_every_level() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            let directives = default_directives(level);
            assert!(
                EnvFilter::try_new(&directives).is_ok(),
                "{directives} should be a valid filter"
            );
        }
    }

    #[test]
    fn dependencies_stay_quieter_than_agent_crates() {
        let directives = default_directives(LogLevel::Debug);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("agent=debug"));
        assert!(directives.contains("domain=debug"));
    }
}
