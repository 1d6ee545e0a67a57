use thiserror::Error;

/// Custom error types for the portfolio guard service
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Redis related errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Server I/O errors (bind, serve)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics exporter errors
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Result type for portfolio guard operations
pub type GuardResult<T> = Result<T, GuardError>;

impl From<metrics_exporter_prometheus::BuildError> for GuardError {
    fn from(err: metrics_exporter_prometheus::BuildError) -> Self {
        GuardError::Metrics(err.to_string())
    }
}
