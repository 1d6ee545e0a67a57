use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RateLimitConfig, Scope, WindowConfig};
use crate::store::{CounterStore, Keyspace, StoreError, StoreResult};
use crate::utils::log_rate_limit;

/// Fixed window rate limiter backed by the shared counter store
pub struct WindowLimiter {
    /// Shared counter store
    store: Arc<dyn CounterStore>,
    keys: Keyspace,
    /// Rate limit configuration, one window per scope
    config: RateLimitConfig,
}

impl WindowLimiter {
    /// Create a new rate limiter instance
    pub fn new(store: Arc<dyn CounterStore>, keys: Keyspace, config: RateLimitConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    /// Window configuration of a scope
    pub fn window(&self, scope: Scope) -> WindowConfig {
        self.config.window(scope)
    }

    /// Count a request from `identity` against the current window of `scope`
    ///
    /// The increment and the expiry of a new window happen in one store
    /// operation. The reset time is taken from the TTL the store reports, so
    /// it reflects the real window boundary. A store failure yields
    /// [`Decision::Degraded`] rather than an error.
    pub async fn admit(&self, scope: Scope, identity: &str) -> Decision {
        let window = self.config.window(scope);
        let key = self.keys.window(scope, identity);

        let counter = match self.store.incr_with_expiry(&key, window.window()).await {
            Ok(counter) => counter,
            Err(e) => return Decision::Degraded(e),
        };

        let exceeded = counter.value > window.max_requests;
        let info = RateLimitInfo {
            limit: window.max_requests,
            remaining: window.max_requests.saturating_sub(counter.value),
            window: window.window(),
            reset_after: counter.ttl,
            reset_at: Utc::now()
                + chrono::Duration::from_std(counter.ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        };

        log_rate_limit(identity, scope.as_str(), exceeded, info.remaining);

        if exceeded {
            Decision::Rejected(info)
        } else {
            Decision::Allowed(info)
        }
    }

    /// Reset the window of an identity (useful for manual intervention)
    pub async fn reset(&self, scope: Scope, identity: &str) -> StoreResult<()> {
        self.store.delete(&self.keys.window(scope, identity)).await
    }
}

/// Outcome of a window check
#[derive(Debug)]
pub enum Decision {
    /// Within quota
    Allowed(RateLimitInfo),
    /// Over quota; `remaining` is zero
    Rejected(RateLimitInfo),
    /// The store could not be consulted; the request is let through
    Degraded(StoreError),
}

impl Decision {
    /// Whether the request may proceed (degraded decisions fail open)
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Rejected(_))
    }

    pub fn info(&self) -> Option<&RateLimitInfo> {
        match self {
            Decision::Allowed(info) | Decision::Rejected(info) => Some(info),
            Decision::Degraded(_) => None,
        }
    }
}

/// Quota state of an identity within its current window
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// Maximum allowed requests
    pub limit: u64,
    /// Remaining requests
    pub remaining: u64,
    /// Window length
    pub window: Duration,
    /// Time until the window resets
    pub reset_after: Duration,
    /// Time when the window resets
    pub reset_at: DateTime<Utc>,
}

impl RateLimitInfo {
    /// Whole seconds until reset, rounded up
    pub fn reset_secs(&self) -> u64 {
        let millis = u64::try_from(self.reset_after.as_millis()).unwrap_or(u64::MAX);
        millis.saturating_add(999) / 1000
    }

    /// Write the standard `RateLimit-*` headers
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", self.limit, self.window.as_secs().max(1));
        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert("ratelimit-policy", value);
        }
        headers.insert("ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("ratelimit-reset", HeaderValue::from(self.reset_secs()));
    }
}
