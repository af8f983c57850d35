//! Tracing subscriber setup.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogConfig, LogFormat};

/// Pick the filter directive: flag, then config file, then `RUST_LOG`,
/// then `info`.
pub fn filter_directive(flag: Option<&str>, config: &LogConfig, env: Option<String>) -> String {
    flag.map(str::to_string)
        .or_else(|| config.level.map(|level| level.as_str().to_string()))
        .or(env.filter(|directive| !directive.trim().is_empty()))
        .unwrap_or_else(|| "info".to_string())
}

/// Install the global subscriber. Logs go to stderr so stdout stays JSON.
pub fn init_logging(flag: Option<&str>, config: &LogConfig) -> Result<()> {
    let directive = filter_directive(flag, config, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| anyhow::anyhow!("invalid log filter '{directive}': {e}"))?;

    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    match config.format {
        LogFormat::Full => tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(layer.compact())
            .with(filter)
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use rstest::rstest;

    fn with_level(level: Option<LogLevel>) -> LogConfig {
        LogConfig {
            level,
            ..LogConfig::default()
        }
    }

    #[rstest]
    #[case(Some("trace"), Some(LogLevel::Warn), Some("debug"), "trace")]
    #[case(None, Some(LogLevel::Warn), Some("debug"), "warn")]
    #[case(None, None, Some("readerd_link=debug"), "readerd_link=debug")]
    #[case(None, None, Some("  "), "info")]
    #[case(None, None, None, "info")]
    fn test_filter_precedence(
        #[case] flag: Option<&str>,
        #[case] level: Option<LogLevel>,
        #[case] env: Option<&str>,
        #[case] expected: &str,
    ) {
        let directive = filter_directive(flag, &with_level(level), env.map(str::to_string));
        assert_eq!(directive, expected);
    }
}
