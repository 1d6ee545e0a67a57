use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

/// Configuration settings for the portfolio guard service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Block policy configuration
    pub block: BlockConfig,
    /// Audit log configuration
    pub audit: AuditConfig,
}

/// Server configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind the server to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// Number of reverse proxy hops whose `X-Forwarded-For` entries are trusted.
    /// Zero ignores the header entirely.
    pub trust_proxy_hops: usize,
    /// Prefix length used to group IPv6 clients into one identity
    pub ipv6_subnet: u8,
    /// Allowed CORS origins: `*` or a comma separated list
    pub cors_origin: String,
    /// Maximum accepted request body size
    pub body_limit_bytes: usize,
    /// Upper bound on the time spent serving one request
    pub request_timeout_ms: u64,
}

/// Redis configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis as the counter store. When false an in-memory store is used,
    /// which only works for a single instance.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Prefix prepended to every key written by the service
    pub key_prefix: String,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    /// Cap on the delay between reconnect attempts
    pub max_backoff_ms: u64,
}

/// Named route groups, each with an independent window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// General API routes
    Api,
    /// Login, registration and token refresh
    Auth,
    /// Search routes
    Search,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Api, Scope::Auth, Scope::Search];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Api => "api",
            Scope::Auth => "auth",
            Scope::Search => "search",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window configuration for one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Maximum number of requests allowed per window
    pub max_requests: u64,
}

impl WindowConfig {
    pub fn new(window_ms: u64, max_requests: u64) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate limiting configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub api: WindowConfig,
    pub auth: WindowConfig,
    pub search: WindowConfig,
}

impl RateLimitConfig {
    /// Window configuration for a scope
    pub fn window(&self, scope: Scope) -> WindowConfig {
        match scope {
            Scope::Api => self.api,
            Scope::Auth => self.auth,
            Scope::Search => self.search,
        }
    }
}

/// Block policy configuration settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Number of rate limit violations before an identity is blocked
    pub threshold: u64,
    /// How long a block, and the violation window, lasts
    pub duration_ms: u64,
}

impl BlockConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Audit log configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    /// File the audit events are appended to
    pub path: String,
    /// Events buffered between the request path and the writer task
    pub queue_capacity: usize,
}

impl Settings {
    /// Load configuration from defaults, a `.env` file and environment variables
    ///
    /// Nested keys use `APP_` plus `__`, e.g. `APP_RATE_LIMIT__AUTH__MAX_REQUESTS`.
    /// The plain `PORT`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD` and
    /// `CORS_ORIGIN` variables are honored and take precedence.
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.port", env::var("PORT").ok())?
            .set_override_option("server.cors_origin", env::var("CORS_ORIGIN").ok())?
            .set_override_option("redis.host", env::var("REDIS_HOST").ok())?
            .set_override_option("redis.port", env::var("REDIS_PORT").ok())?
            .set_override_option("redis.password", env::var("REDIS_PASSWORD").ok())?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations that cannot be enforced
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        for scope in Scope::ALL {
            let window = self.rate_limit.window(scope);
            if window.window_ms == 0 || window.max_requests == 0 {
                return Err(config::ConfigError::Message(format!(
                    "rate_limit.{scope}: window_ms and max_requests must be greater than zero"
                )));
            }
        }
        if self.block.threshold == 0 || self.block.duration_ms == 0 {
            return Err(config::ConfigError::Message(
                "block.threshold and block.duration_ms must be greater than zero".to_string(),
            ));
        }
        if self.server.ipv6_subnet > 128 {
            return Err(config::ConfigError::Message(format!(
                "server.ipv6_subnet must be at most 128, got {}",
                self.server.ipv6_subnet
            )));
        }
        if self.audit.queue_capacity == 0 {
            return Err(config::ConfigError::Message(
                "audit.queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default values for configuration settings
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                trust_proxy_hops: 1,
                ipv6_subnet: 56,
                cors_origin: "*".to_string(),
                body_limit_bytes: 16 * 1024,
                request_timeout_ms: 30_000,
            },
            redis: RedisConfig {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port: 6379,
                password: None,
                key_prefix: "portfolio:".to_string(),
                connect_timeout_ms: 2_000,
                command_timeout_ms: 500,
                max_backoff_ms: 2_000,
            },
            rate_limit: RateLimitConfig {
                api: WindowConfig::new(15 * 60 * 1000, 5),
                auth: WindowConfig::new(15 * 60 * 1000, 20),
                search: WindowConfig::new(60 * 1000, 30),
            },
            block: BlockConfig {
                threshold: 10,
                duration_ms: 24 * 60 * 60 * 1000,
            },
            audit: AuditConfig {
                enabled: true,
                path: "rate-limit-logs.txt".to_string(),
                queue_capacity: 1024,
            },
        }
    }
}
