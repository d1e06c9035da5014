//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while locating, parsing, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file was found at any of the searched locations.
    #[error("no config found: searched {searched:?} (expected ./.env or ./ask4me.yaml)")]
    NotFound { searched: Vec<PathBuf> },

    /// A required key is missing or blank.
    #[error("{key} is required")]
    MissingKey { key: &'static str },

    #[error("invalid base_url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// A file with an ambiguous extension parsed as neither format.
    #[error("unrecognized config file {path}: yaml error: {yaml}; dotenv error: {dotenv}")]
    Unrecognized {
        path: PathBuf,
        yaml: String,
        dotenv: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Dotenv(#[from] dotenvy::Error),
}
