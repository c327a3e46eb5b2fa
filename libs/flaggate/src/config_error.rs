use thiserror::Error;

/// Errors that can occur while validating gate configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid registry configuration: {0}")]
    InvalidRegistry(String),

    #[error("invalid cache configuration: {0}")]
    InvalidCache(String),

    #[error("invalid route configuration: {0}")]
    InvalidRoute(String),

    #[error("no flag source configured: set registry.endpoint or registry.file")]
    MissingSource,

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}
