//! Command-line interface for the `cacheproxy` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigError, ProxyConfig};
use crate::logging::{LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "cacheproxy",
    version = env!("CARGO_PKG_VERSION"),
    about = "In-memory caching reverse proxy for a single HTTP origin",
    long_about = None
)]
pub struct Cli {
    #[arg(short, long, help = "JSON config file; flags override its values")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Address to accept client connections on [default: 127.0.0.1:8080]")]
    pub listen: Option<String>,

    #[arg(short, long, help = "Origin server as host:port or http://host:port [default: 127.0.0.1:9090]")]
    pub origin: Option<String>,

    #[arg(long, value_enum, help = "Logging level [default: info]")]
    pub log_level: Option<LogLevel>,

    #[arg(long, value_enum, help = "Log output format [default: pretty]")]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Resolves the effective configuration: defaults, then the config file,
    /// then any flags given.
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_file(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(origin) = self.origin {
            config.origin = origin;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_gives_defaults() {
        let cli = Cli::try_parse_from(["cacheproxy"]).unwrap();
        assert_eq!(cli.into_config().unwrap(), ProxyConfig::default());
    }

    #[test]
    fn flags_override() {
        let cli = Cli::try_parse_from([
            "cacheproxy",
            "--listen",
            "0.0.0.0:8000",
            "-o",
            "http://backend:9000",
            "--log-level",
            "debug",
            "--log-format",
            "compact",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.listen, "0.0.0.0:8000");
        assert_eq!(config.origin_authority().unwrap(), "backend:9000");
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, LogFormat::Compact);
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        assert!(Cli::try_parse_from(["cacheproxy", "--log-level", "loud"]).is_err());
    }
}
