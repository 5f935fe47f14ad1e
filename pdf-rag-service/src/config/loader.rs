//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::dynamic_config::DynamicConfig;
use super::static_config::StaticConfig;

const ENV_PREFIX: &str = "PDF_RAG";

fn config_sources() -> ServiceResult<Config> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })
}

/// Load dynamic configuration from file and env vars (without DB overrides)
pub(super) fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize dynamic config: {}", e),
        })
}
