//! Environment-backed configuration.
//!
//! Every setting has a default. Override with `QUIZSCORE_*` environment variables.

pub mod error;
pub mod registry;


pub use error::ConfigError;
pub use registry::{ModelEntry, ModelRegistry};

use std::time::Duration;

use crate::gateway::{ApiCredential, EndpointConfig};
use crate::likelihood::{Aggregation, DEFAULT_MODEL_TIMEOUT};

/// Scorer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Completion endpoint and per-request timeout.
    pub endpoint: EndpointConfig,
    pub credential: ApiCredential,
    /// Budget for one model's whole evaluation. Default: 120s.
    pub model_timeout: Duration,
    pub aggregation: Aggregation,
    pub registry: ModelRegistry,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            credential: ApiCredential::none(),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            aggregation: Aggregation::default(),
            registry: ModelRegistry::default(),
        }
    }
}

impl ScorerConfig {
    pub const ENV_API_BASE_URL: &'static str = "QUIZSCORE_API_BASE_URL";
    pub const ENV_API_KEY: &'static str = "QUIZSCORE_API_KEY";
    pub const ENV_TIMEOUT_SECONDS: &'static str = "QUIZSCORE_TIMEOUT_SECONDS";
    pub const ENV_MODEL_TIMEOUT_SECONDS: &'static str = "QUIZSCORE_MODEL_TIMEOUT_SECONDS";
    pub const ENV_AGGREGATION: &'static str = "QUIZSCORE_AGGREGATION";
    pub const ENV_MODELS: &'static str = "QUIZSCORE_MODELS";

    /// Loads configuration from the process environment (falling back to defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_url = get(Self::ENV_API_BASE_URL).unwrap_or(defaults.endpoint.base_url);
        let request_timeout = parse_seconds(
            Self::ENV_TIMEOUT_SECONDS,
            get(Self::ENV_TIMEOUT_SECONDS),
            defaults.endpoint.request_timeout,
        )?;
        let model_timeout = parse_seconds(
            Self::ENV_MODEL_TIMEOUT_SECONDS,
            get(Self::ENV_MODEL_TIMEOUT_SECONDS),
            defaults.model_timeout,
        )?;

        let credential = get(Self::ENV_API_KEY)
            .map(ApiCredential::bearer)
            .unwrap_or_else(ApiCredential::none);

        let aggregation = match get(Self::ENV_AGGREGATION) {
            Some(value) => value
                .parse::<Aggregation>()
                .map_err(|message| ConfigError::InvalidAggregation { message })?,
            None => defaults.aggregation,
        };

        let registry = match get(Self::ENV_MODELS) {
            Some(value) => ModelRegistry::parse_list(&value)?,
            None => defaults.registry,
        };

        Ok(Self {
            endpoint: EndpointConfig::new(base_url).request_timeout(request_timeout),
            credential,
            model_timeout,
            aggregation,
            registry,
        })
    }
}

fn parse_seconds(
    name: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|source| ConfigError::InvalidNumber {
            name,
            value: value.clone(),
            source,
        })?;
    if secs == 0 {
        return Err(ConfigError::ZeroTimeout { name });
    }
    Ok(Duration::from_secs(secs))
}
