//! Configuration error types

use casskit_resources::ResourceError;
use thiserror::Error;

/// Configuration result type
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Port allocation failed: {0}")]
    Ports(#[from] ResourceError),

    #[error("Materialization step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to load harness settings: {0}")]
    Load(#[from] config::ConfigError),
}
