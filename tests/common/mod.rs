#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use portfolio_guard::config::{Scope, Settings, WindowConfig};
use portfolio_guard::core::{AdmissionRequest, AuditSink};
use portfolio_guard::service::AbuseGuard;
use portfolio_guard::store::MemoryStore;

/// Generate a random IP address for testing
pub fn random_ip() -> String {
    format!(
        "{}.{}.{}.{}",
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>()
    )
}

/// Default settings with a custom window for the `api` scope
pub fn settings(window_ms: u64, max_requests: u64) -> Settings {
    let mut settings = Settings::default();
    settings.rate_limit.api = WindowConfig::new(window_ms, max_requests);
    settings.audit.enabled = false;
    settings.redis.enabled = false;
    settings.redis.key_prefix = "test:".to_string();
    settings
}

/// Guard over a fresh in-memory store, returned alongside for inspection
pub fn guard(settings: &Settings) -> (Arc<AbuseGuard>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let guard = AbuseGuard::new(store.clone(), settings, AuditSink::disabled());
    (Arc::new(guard), store)
}

pub fn request(identity: &str, scope: Scope) -> AdmissionRequest {
    AdmissionRequest {
        identity: identity.to_string(),
        scope,
        endpoint: "/api/v1/projects/getAllProjects".to_string(),
    }
}

/// Move tokio's paused clock forward
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
}
