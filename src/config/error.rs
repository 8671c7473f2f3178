//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading configuration or the model registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric setting could not be parsed.
    #[error("failed to parse {name}='{value}': {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// A timeout of zero would fail every request.
    #[error("{name} must be greater than zero")]
    ZeroTimeout { name: &'static str },

    #[error("invalid aggregation: {message}")]
    InvalidAggregation { message: String },

    /// A model list entry was not `Name=model/id`.
    #[error("invalid model entry '{entry}': expected Name=model/id")]
    InvalidModelEntry { entry: String },

    #[error("model registry is empty")]
    EmptyRegistry,

    #[error("failed to read model registry {path}: {source}")]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model registry {path}: {source}")]
    RegistryParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
