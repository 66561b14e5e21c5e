use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HprofError>;

/// Terminal failures of a dump or an inspection.
#[derive(Debug, Error)]
pub enum HprofError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write heap dump: {0}")]
    Write(#[from] io::Error),
    #[error("heap is not available for inspection: {0}")]
    RuntimeUnavailable(String),
    #[error("malformed heap dump: {0}")]
    Format(String),
    #[error("failed to parse heap snapshot {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Problems with redaction or tool configuration.
///
/// Redaction problems never abort a dump; the policy degrades to OFF instead.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("malformed redaction map entry `{entry}` (expected `key:value`)")]
    MalformedMapEntry { entry: String },
    #[error("map redaction requires an inline map or a map file")]
    MissingMapSource,
    #[error("map redaction resolved to an empty mapping")]
    EmptyMap,
    #[error("annotation redaction requires a non-empty classpath restriction")]
    EmptyClasspath,
    #[error("unknown redaction mode `{0}`")]
    UnknownMode(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value.message().to_string())
    }
}

/// Reasons an explicit redaction request was not authorized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("no redaction credential supplied")]
    MissingCredential,
    #[error("redaction credential must have the form `password,salt`")]
    Malformed,
    #[error(
        "redaction salt is too short ({len} bytes, need at least {min})",
        min = crate::auth::MIN_SALT_LEN
    )]
    SaltTooShort { len: usize },
    #[error("no redaction password is configured")]
    NoConfiguredSecret,
    #[error("redaction password does not match")]
    Mismatch,
}
