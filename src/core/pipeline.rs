//! Ordered admission checks.
//!
//! Every guarded request runs through an [`AdmissionPipeline`]: each check
//! returns a [`Verdict`], the first `Deny` ends the run, and the quota of the
//! last check that reported one is handed back for the response headers.

use async_trait::async_trait;
use std::sync::Arc;

use super::audit::{AuditEvent, AuditSink};
use super::block_gate::{BlockGate, GateStatus};
use super::health::{StoreComponent, StoreHealth};
use super::rate_limiter::{Decision, RateLimitInfo, WindowLimiter};
use super::violations::ViolationAccountant;
use crate::config::Scope;
use crate::error::Rejection;

/// What the admission checks know about a request
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub identity: String,
    pub scope: Scope,
    pub endpoint: String,
}

/// Result of one check, or of a whole pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow { quota: Option<RateLimitInfo> },
    Deny(Rejection),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }
}

/// A single step of the admission pipeline
#[async_trait]
pub trait AdmissionCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, request: &AdmissionRequest) -> Verdict;
}

/// Runs admission checks in order
#[derive(Clone, Default)]
pub struct AdmissionPipeline {
    checks: Vec<Arc<dyn AdmissionCheck>>,
}

impl AdmissionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a check; checks run in insertion order
    pub fn with(mut self, check: Arc<dyn AdmissionCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub async fn run(&self, request: &AdmissionRequest) -> Verdict {
        let mut quota = None;
        for check in &self.checks {
            match check.check(request).await {
                Verdict::Allow { quota: Some(info) } => quota = Some(info),
                Verdict::Allow { quota: None } => {}
                Verdict::Deny(rejection) => {
                    tracing::debug!(check = check.name(), identity = %request.identity, "request denied");
                    return Verdict::Deny(rejection);
                }
            }
        }
        Verdict::Allow { quota }
    }
}

/// Denies identities that carry a block flag
pub struct BlockCheck {
    gate: Arc<BlockGate>,
    health: Arc<StoreHealth>,
}

impl BlockCheck {
    pub fn new(gate: Arc<BlockGate>, health: Arc<StoreHealth>) -> Self {
        Self { gate, health }
    }
}

#[async_trait]
impl AdmissionCheck for BlockCheck {
    fn name(&self) -> &'static str {
        "block_gate"
    }

    async fn check(&self, request: &AdmissionRequest) -> Verdict {
        match self.gate.status(&request.identity).await {
            GateStatus::Open => {
                self.health.record_success(StoreComponent::BlockGate);
                Verdict::Allow { quota: None }
            }
            GateStatus::Blocked => {
                self.health.record_success(StoreComponent::BlockGate);
                Verdict::Deny(Rejection::IpBlocked)
            }
            GateStatus::Degraded(e) => {
                self.health.record_failure(StoreComponent::BlockGate, &e);
                Verdict::Allow { quota: None }
            }
        }
    }
}

/// Enforces the window of the request's scope and accounts for violations
pub struct QuotaCheck {
    limiter: Arc<WindowLimiter>,
    accountant: Arc<ViolationAccountant>,
    audit: AuditSink,
    health: Arc<StoreHealth>,
}

impl QuotaCheck {
    pub fn new(
        limiter: Arc<WindowLimiter>,
        accountant: Arc<ViolationAccountant>,
        audit: AuditSink,
        health: Arc<StoreHealth>,
    ) -> Self {
        Self {
            limiter,
            accountant,
            audit,
            health,
        }
    }
}

#[async_trait]
impl AdmissionCheck for QuotaCheck {
    fn name(&self) -> &'static str {
        "window_limiter"
    }

    async fn check(&self, request: &AdmissionRequest) -> Verdict {
        let info = match self.limiter.admit(request.scope, &request.identity).await {
            Decision::Allowed(info) => {
                self.health.record_success(StoreComponent::WindowLimiter);
                return Verdict::Allow { quota: Some(info) };
            }
            Decision::Degraded(e) => {
                self.health.record_failure(StoreComponent::WindowLimiter, &e);
                return Verdict::Allow { quota: None };
            }
            Decision::Rejected(info) => {
                self.health.record_success(StoreComponent::WindowLimiter);
                info
            }
        };

        self.audit.record(AuditEvent::violation(
            &request.identity,
            &request.endpoint,
            request.scope.as_str(),
        ));

        // Accounting never changes the answer: the request is rejected either way.
        match self
            .accountant
            .record_violation(&request.identity, &request.endpoint)
            .await
        {
            Ok(outcome) => {
                self.health.record_success(StoreComponent::ViolationAccountant);
                tracing::debug!(
                    identity = %request.identity,
                    violations = outcome.count,
                    blocked = outcome.blocked,
                    "violation recorded"
                );
            }
            Err(e) => {
                self.health.record_failure(StoreComponent::ViolationAccountant, &e);
                tracing::error!(identity = %request.identity, error = %e, "Violation tracking failed");
            }
        }

        Verdict::Deny(Rejection::RateLimitExceeded(info))
    }
}
