//! Core functionality of the admission layer.
//! This module contains the identity resolver, the window limiter,
//! violation accounting, the block gate and the audit log, plus the
//! pipeline that runs them in order.

mod audit;
mod block_gate;
mod health;
mod identity;
mod pipeline;
mod rate_limiter;
mod scopes;
mod violations;

pub use audit::{AuditEvent, AuditKind, AuditSink};
pub use block_gate::{BlockGate, GateStatus};
pub use health::{StoreComponent, StoreHealth};
pub use identity::{IdentityResolver, UNKNOWN_IDENTITY};
pub use pipeline::{
    AdmissionCheck, AdmissionPipeline, AdmissionRequest, BlockCheck, QuotaCheck, Verdict,
};
pub use rate_limiter::{Decision, RateLimitInfo, WindowLimiter};
pub use scopes::ScopeRoutes;
pub use violations::{ViolationAccountant, ViolationOutcome, BLOCKED_MARKER};
