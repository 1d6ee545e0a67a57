use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::store::StoreError;
use crate::utils::{log_store_degraded, log_store_recovered};

/// Part of the admission layer that talks to the counter store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreComponent {
    BlockGate,
    WindowLimiter,
    ViolationAccountant,
}

impl StoreComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreComponent::BlockGate => "block_gate",
            StoreComponent::WindowLimiter => "window_limiter",
            StoreComponent::ViolationAccountant => "violation_accountant",
        }
    }

    fn bit(self) -> u8 {
        match self {
            StoreComponent::BlockGate => 1,
            StoreComponent::WindowLimiter => 1 << 1,
            StoreComponent::ViolationAccountant => 1 << 2,
        }
    }
}

/// Tracks whether the counter store is failing, so an outage is logged once
/// instead of once per request.
///
/// Failures are tracked per component. An episode opens when the first
/// component starts failing and closes only once every failing component has
/// succeeded again, so a store that answers reads but rejects writes stays in
/// one episode. Warnings (opening or reminder) are logged at most once per
/// minute, and so are recovery lines, however often the store flaps.
pub struct StoreHealth {
    failing: AtomicU8,
    episodes: AtomicU64,
    warnings: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    recoveries: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl StoreHealth {
    pub fn new() -> Self {
        Self {
            failing: AtomicU8::new(0),
            episodes: AtomicU64::new(0),
            warnings: RateLimiter::direct(Quota::per_minute(NonZeroU32::MIN)),
            recoveries: RateLimiter::direct(Quota::per_minute(NonZeroU32::MIN)),
        }
    }

    /// Record a failed store operation made on behalf of `component`
    pub fn record_failure(&self, component: StoreComponent, error: &StoreError) {
        metrics::increment_counter!("store_degraded_total", "component" => component.as_str());

        let before = self.failing.fetch_or(component.bit(), Ordering::SeqCst);
        let episode = if before == 0 {
            self.episodes.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.episodes()
        };

        if self.warnings.check().is_ok() {
            log_store_degraded(component.as_str(), &error.to_string(), episode);
        } else {
            tracing::trace!(component = component.as_str(), error = %error, "store still degraded");
        }
    }

    /// Record a successful store operation made on behalf of `component`
    pub fn record_success(&self, component: StoreComponent) {
        let before = self.failing.fetch_and(!component.bit(), Ordering::SeqCst);
        if before == component.bit() && self.recoveries.check().is_ok() {
            log_store_recovered(self.episodes());
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.failing.load(Ordering::SeqCst) != 0
    }

    /// Number of outage episodes seen since startup
    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::SeqCst)
    }
}

impl Default for StoreHealth {
    fn default() -> Self {
        Self::new()
    }
}
