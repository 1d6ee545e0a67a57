use axum::http::HeaderMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::{Scope, Settings};
use crate::core::{
    AdmissionPipeline, AdmissionRequest, AuditSink, BlockCheck, BlockGate, GateStatus,
    IdentityResolver, QuotaCheck, ScopeRoutes, StoreHealth, Verdict, ViolationAccountant,
    WindowLimiter,
};
use crate::error::Rejection;
use crate::store::{CounterStore, Keyspace, StoreResult};

/// Current abuse state of an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStatus {
    pub identity: String,
    pub blocked: bool,
    pub violations: u64,
}

/// Admission layer in front of the API
///
/// Owns the identity resolver, the scope routing table and the admission
/// pipeline (block gate, then window limiter with violation accounting).
/// All state lives in the injected counter store, so any number of
/// instances can share it.
pub struct AbuseGuard {
    resolver: IdentityResolver,
    scopes: ScopeRoutes,
    pipeline: AdmissionPipeline,
    limiter: Arc<WindowLimiter>,
    accountant: Arc<ViolationAccountant>,
    gate: Arc<BlockGate>,
    health: Arc<StoreHealth>,
}

impl AbuseGuard {
    /// Creates the admission layer
    ///
    /// # Arguments
    ///
    /// * `store` - Counter store shared by every check
    /// * `settings` - Limits, block policy and proxy trust
    /// * `audit` - Sink receiving violation and block events
    pub fn new(store: Arc<dyn CounterStore>, settings: &Settings, audit: AuditSink) -> Self {
        let keys = Keyspace::new(settings.redis.key_prefix.clone());
        let health = Arc::new(StoreHealth::new());

        let gate = Arc::new(BlockGate::new(store.clone(), keys.clone()));
        let limiter = Arc::new(WindowLimiter::new(
            store.clone(),
            keys.clone(),
            settings.rate_limit.clone(),
        ));
        let accountant = Arc::new(ViolationAccountant::new(
            store,
            keys,
            settings.block,
            audit.clone(),
        ));

        let pipeline = AdmissionPipeline::new()
            .with(Arc::new(BlockCheck::new(gate.clone(), health.clone())))
            .with(Arc::new(QuotaCheck::new(
                limiter.clone(),
                accountant.clone(),
                audit,
                health.clone(),
            )));

        Self {
            resolver: IdentityResolver::from_config(&settings.server),
            scopes: ScopeRoutes::default(),
            pipeline,
            limiter,
            accountant,
            gate,
            health,
        }
    }

    /// Replace the scope routing table
    pub fn with_scopes(mut self, scopes: ScopeRoutes) -> Self {
        self.scopes = scopes;
        self
    }

    /// Resolve the identity of a request
    pub fn identity(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
        self.resolver.resolve(peer, headers)
    }

    /// Scope a request path is counted under
    pub fn scope_for(&self, path: &str) -> Scope {
        self.scopes.scope_for(path)
    }

    /// Run the admission pipeline for a request
    pub async fn admit(&self, request: &AdmissionRequest) -> Verdict {
        let verdict = self.pipeline.run(request).await;

        let outcome = match &verdict {
            Verdict::Allow { quota: Some(_) } => "allowed",
            Verdict::Allow { quota: None } => "unmetered",
            Verdict::Deny(Rejection::IpBlocked) => "blocked",
            Verdict::Deny(Rejection::RateLimitExceeded(_)) => "rate_limited",
        };
        metrics::increment_counter!(
            "admission_decisions_total",
            "scope" => request.scope.as_str(),
            "outcome" => outcome
        );

        verdict
    }

    /// Lift the block of an identity and forget its violations
    pub async fn unblock(&self, identity: &str) -> StoreResult<()> {
        self.gate.unblock(identity).await?;
        self.accountant.clear(identity).await?;
        tracing::info!(identity = %identity, event = "ip_unblocked", "IP unblocked");
        Ok(())
    }

    /// Reset the window of an identity in one scope
    pub async fn reset(&self, scope: Scope, identity: &str) -> StoreResult<()> {
        self.limiter.reset(scope, identity).await
    }

    /// Gets the current block and violation state of an identity
    pub async fn status(&self, identity: &str) -> StoreResult<IdentityStatus> {
        let blocked = match self.gate.status(identity).await {
            GateStatus::Open => false,
            GateStatus::Blocked => true,
            GateStatus::Degraded(e) => return Err(e),
        };
        let violations = self.accountant.violations(identity).await?;
        Ok(IdentityStatus {
            identity: identity.to_string(),
            blocked,
            violations,
        })
    }

    pub fn health(&self) -> &StoreHealth {
        &self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockCounterStore, StoreError};

    #[tokio::test]
    async fn status_reports_unreadable_block_flag_as_error() {
        let mut store = MockCounterStore::new();
        store.expect_get().returning(|key: &str| {
            if key.contains("blocked:") {
                Err(StoreError::Unavailable("connection reset".to_string()))
            } else {
                Ok(Some("3".to_string()))
            }
        });
        let guard = AbuseGuard::new(Arc::new(store), &Settings::default(), AuditSink::disabled());

        let err = guard.status("1.2.3.4").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn status_reads_flag_and_violations() {
        let mut store = MockCounterStore::new();
        store.expect_get().returning(|key: &str| {
            if key.contains("blocked:") {
                Ok(Some("true".to_string()))
            } else {
                Ok(Some("10".to_string()))
            }
        });
        let guard = AbuseGuard::new(Arc::new(store), &Settings::default(), AuditSink::disabled());

        let status = guard.status("1.2.3.4").await.unwrap();
        assert!(status.blocked);
        assert_eq!(status.violations, 10);
    }
}
