//! Configuration management for the portfolio guard service.
//! This module handles loading and managing configuration settings
//! from environment variables and configuration files.

mod settings;

pub use settings::{
    AuditConfig, BlockConfig, RateLimitConfig, RedisConfig, Scope, ServerConfig, Settings,
    WindowConfig,
};

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, config::ConfigError>;

/// Load and validate the application configuration
pub fn load_config() -> ConfigResult<Settings> {
    Settings::load()
}
