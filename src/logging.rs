//! Logging initialization
//!
//! Installs the global tracing subscriber: level control through an
//! `EnvFilter` (so `RUST_LOG` directives still apply on top of the
//! configured level), pretty or JSON formatting selected by configuration,
//! and a stderr writer so stdout stays free for shell redirection.

use anyhow::{Context, Result};
use std::io;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::{config::LoggingConfig, error::ScanmanError};

/// Install the subscriber with default settings (info level, pretty)
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Install the subscriber from the loaded logging configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(&config.level)?;
    let stderr = fmt::layer().with_writer(io::stderr);

    if config.format == "json" {
        Registry::default()
            .with(filter)
            .with(stderr.json().with_target(true))
            .init();
    } else {
        Registry::default()
            .with(filter)
            .with(stderr.pretty().with_target(false))
            .init();
    }

    tracing::debug!(level = %config.level, format = %config.format, "Logging initialized");
    Ok(())
}

/// Build the level filter, quieting dependency internals unless a RUST_LOG
/// directive asks for them
fn env_filter(level: &str) -> Result<EnvFilter> {
    let directive = match level.to_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_string(),
        other => {
            return Err(ScanmanError::config(format!("Invalid log level: {}", other)).into())
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(directive.parse().context("Failed to parse log level")?)
        .from_env()
        .context("Failed to read RUST_LOG directives")?
        .add_directive("sqlx=warn".parse()?)
        .add_directive("hyper=info".parse()?);

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_levels_accepted() {
        for level in ["trace", "debug", "info", "warn", "error", "WARN"] {
            assert!(env_filter(level).is_ok(), "level {} rejected", level);
        }
    }

    #[test]
    fn test_unknown_level_rejected() {
        assert!(env_filter("verbose").is_err());
    }
}
