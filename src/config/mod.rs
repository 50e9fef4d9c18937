//! Proxy configuration.
//!
//! Values come from, lowest precedence first: built-in defaults, an optional
//! JSON file, then command-line flags (see [`crate::cli`]). The result is
//! immutable once the proxy starts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogConfig;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_ORIGIN: &str = "127.0.0.1:9090";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("origin address is empty")]
    EmptyOrigin,

    #[error("unsupported origin scheme in {0:?}; only plain http origins are supported")]
    UnsupportedScheme(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy accepts client connections on.
    pub listen: String,
    /// Origin server, as `host:port` or `http://host:port`.
    pub origin: String,
    pub log: LogConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_owned(),
            origin: DEFAULT_ORIGIN.to_owned(),
            log: LogConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Returns the origin as the `host:port` to connect to.
    ///
    /// An `http://` prefix and anything after the authority are stripped.
    pub fn origin_authority(&self) -> Result<String, ConfigError> {
        let origin = self.origin.trim();

        let rest = match origin.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
            Some(_) => return Err(ConfigError::UnsupportedScheme(origin.to_owned())),
            None => origin,
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(ConfigError::EmptyOrigin);
        }

        Ok(authority.to_owned())
    }
}
