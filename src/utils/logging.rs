use std::env;
use std::time::Duration;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Initialize the logging system with the level taken from `RUST_LOG`
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    // Get the log level from environment variable or default to INFO
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_level(true)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .pretty()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Create a new span for tracking request context
pub fn create_request_span(request_id: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        identity = tracing::field::Empty,
        scope = tracing::field::Empty,
    )
}

/// Log a rate limit decision
pub fn log_rate_limit(identity: &str, scope: &str, exceeded: bool, remaining: u64) {
    if exceeded {
        tracing::warn!(
            identity = %identity,
            scope = %scope,
            event = "rate_limit_exceeded",
            timestamp = %chrono::Utc::now()
        );
    } else {
        tracing::debug!(
            identity = %identity,
            scope = %scope,
            remaining = remaining,
            event = "rate_limit_check",
        );
    }
}

/// Log an identity being blocked after repeated violations
pub fn log_ip_blocked(identity: &str, violations: u64, duration: Duration) {
    tracing::warn!(
        identity = %identity,
        violations = violations,
        block_secs = duration.as_secs(),
        event = "ip_blocked",
        timestamp = %chrono::Utc::now()
    );
}

/// Log the counter store entering degraded (fail-open) mode
pub fn log_store_degraded(component: &str, reason: &str, episode: u64) {
    tracing::warn!(
        component = %component,
        reason = %reason,
        episode = episode,
        event = "store_degraded",
        "counter store unavailable, admitting requests without enforcement"
    );
}

/// Log the counter store recovering from degraded mode
pub fn log_store_recovered(episode: u64) {
    tracing::info!(
        episode = episode,
        event = "store_recovered",
        "counter store reachable again, enforcement resumed"
    );
}
