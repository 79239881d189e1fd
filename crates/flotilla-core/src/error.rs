//! Error types for configuration and label handling.

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating `flotilla.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0:?}")]
    Duration(String),

    #[error("unknown instance size: {0:?}")]
    UnknownSize(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised while parsing a label expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("empty label expression")]
    Empty,

    #[error("unexpected token {token:?} at offset {offset}")]
    UnexpectedToken { token: String, offset: usize },

    #[error("unterminated expression, expected {expected}")]
    Unterminated { expected: &'static str },

    #[error("label expression is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("label expression nests deeper than {max} levels")]
    TooDeep { max: usize },
}
