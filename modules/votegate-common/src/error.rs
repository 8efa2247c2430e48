//! Typed errors for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has the wrong shape
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Backend name other than SQLITE or MYSQL
    #[error("unknown database type: {0}")]
    UnknownBackend(String),

    /// Table prefix would not form a plain SQL identifier
    #[error("invalid table prefix {0:?}: only letters, digits and '_' are allowed")]
    InvalidTablePrefix(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
