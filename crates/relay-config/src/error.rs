//! Configuration error types.

use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file couldn't be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The path that couldn't be read.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file's TOML was malformed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// The path that failed to parse.
        path: String,
        /// The underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable had an invalid value for its type.
    #[error("invalid value for {var}: {value}")]
    InvalidEnvVar {
        /// The environment variable name.
        var: String,
        /// The value that failed to parse.
        value: String,
    },
}

/// Result type for configuration resolution.
pub type ConfigResult<T> = Result<T, ConfigError>;
