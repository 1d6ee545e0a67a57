//! Counter store shared by every admission check.
//!
//! All rate limiting and blocking state lives behind [`CounterStore`], so it
//! survives restarts and is shared by every instance pointing at the same
//! backend. Each method is a single atomic operation on the backend; callers
//! never read-then-write.

mod memory;
mod redis_store;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{RedisConfig, Scope};
use crate::utils::GuardResult;

pub use self::memory::MemoryStore;
pub use self::redis_store::{reconnect_delay, RedisStore};

/// Errors raised by counter store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// No connection to the backend is currently available
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the command timeout
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    /// The backend rejected or failed the command
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A counter key holds something other than an integer
    #[error("key {0} does not hold an integer")]
    NotAnInteger(String),
}

/// Result type for counter store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Value of a counter after an increment, with the key's remaining lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub value: u64,
    pub ttl: Duration,
}

/// Shared key-value store with atomic counters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one. If the increment creates the key, or the key has
    /// no expiry, `ttl` is attached in the same atomic operation. An existing
    /// expiry is never refreshed.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<Counter>;

    /// Read the value of `key`, `None` when absent or expired
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set `key` to `value`, expiring after `ttl`
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Remove `key`
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Builds the keys used by the admission checks
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Window counter for one scope and identity
    pub fn window(&self, scope: Scope, identity: &str) -> String {
        format!("{}rate_limit:{}:{}", self.prefix, scope, identity)
    }

    /// Violation counter for an identity
    pub fn violations(&self, identity: &str) -> String {
        format!("{}violations:{}", self.prefix, identity)
    }

    /// Block flag for an identity
    pub fn blocked(&self, identity: &str) -> String {
        format!("{}blocked:{}", self.prefix, identity)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new("portfolio:")
    }
}

/// Build the counter store selected by the configuration
pub async fn from_config(config: &RedisConfig) -> GuardResult<Arc<dyn CounterStore>> {
    if config.enabled {
        Ok(Arc::new(RedisStore::connect(config).await?))
    } else {
        tracing::warn!("Redis disabled, using in-memory counter store (single instance only)");
        Ok(Arc::new(MemoryStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_and_scoped() {
        let keys = Keyspace::new("test:");
        assert_eq!(keys.window(Scope::Auth, "1.2.3.4"), "test:rate_limit:auth:1.2.3.4");
        assert_eq!(keys.violations("1.2.3.4"), "test:violations:1.2.3.4");
        assert_eq!(keys.blocked("1.2.3.4"), "test:blocked:1.2.3.4");
    }

    #[test]
    fn scopes_do_not_share_window_keys() {
        let keys = Keyspace::default();
        assert_ne!(keys.window(Scope::Api, "a"), keys.window(Scope::Search, "a"));
    }
}
