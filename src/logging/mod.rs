//! Global `tracing` subscriber setup for the binary.
//!
//! The library only emits events; installing a subscriber is left to the
//! process that embeds it.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing_subscriber::util::TryInitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    // Human-readable multi-line format
    #[default]
    Pretty,

    // JSON format for machine parsing
    Json,

    // Compact single-line format
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl LogConfig {
    /// Filter used when `RUST_LOG` is not set: this crate at the configured
    /// level, everything else at `warn`.
    pub fn default_directive(&self) -> String {
        let level = self.level.as_tracing_level().to_string().to_lowercase();
        format!("warn,cacheproxy={level}")
    }
}

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the
/// configured level.
///
/// # Errors
///
/// Fails if a global subscriber has already been installed.
pub fn configure_global_tracing(config: &LogConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_thread_ids(true).with_line_number(false))
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_level_to_crate() {
        let config = LogConfig {
            level: LogLevel::Debug,
            format: LogFormat::Compact,
        };
        assert_eq!(config.default_directive(), "warn,cacheproxy=debug");
        assert_eq!(LogConfig::default().default_directive(), "warn,cacheproxy=info");
    }

    #[test]
    fn levels_deserialize_lowercase() {
        let config: LogConfig = serde_json::from_str(r#"{"level":"trace","format":"json"}"#).unwrap();
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.format, LogFormat::Json);
    }
}
