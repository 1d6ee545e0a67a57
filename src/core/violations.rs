use std::sync::Arc;

use super::audit::{AuditEvent, AuditSink};
use crate::config::BlockConfig;
use crate::store::{CounterStore, Keyspace, StoreError, StoreResult};
use crate::utils::log_ip_blocked;

/// Value stored under a block flag key
pub const BLOCKED_MARKER: &str = "true";

/// Result of recording a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationOutcome {
    /// Violations within the current violation window, this one included
    pub count: u64,
    /// Whether this violation put the identity over the block threshold
    pub blocked: bool,
}

/// Counts rate limit violations per identity and blocks repeat offenders
///
/// The violation window starts at the first offense: the expiry is attached by
/// the increment that creates the counter and later violations never extend
/// it.
pub struct ViolationAccountant {
    store: Arc<dyn CounterStore>,
    keys: Keyspace,
    policy: BlockConfig,
    audit: AuditSink,
}

impl ViolationAccountant {
    pub fn new(
        store: Arc<dyn CounterStore>,
        keys: Keyspace,
        policy: BlockConfig,
        audit: AuditSink,
    ) -> Self {
        Self {
            store,
            keys,
            policy,
            audit,
        }
    }

    /// Record a rejected request from `identity` on `endpoint`
    pub async fn record_violation(
        &self,
        identity: &str,
        endpoint: &str,
    ) -> StoreResult<ViolationOutcome> {
        let duration = self.policy.duration();
        let counter = self
            .store
            .incr_with_expiry(&self.keys.violations(identity), duration)
            .await?;
        metrics::increment_counter!("rate_limit_violations_total");

        if counter.value < self.policy.threshold {
            return Ok(ViolationOutcome {
                count: counter.value,
                blocked: false,
            });
        }

        self.store
            .set_with_expiry(&self.keys.blocked(identity), BLOCKED_MARKER, duration)
            .await?;
        metrics::increment_counter!("ip_blocks_total");

        log_ip_blocked(identity, counter.value, duration);
        self.audit
            .record(AuditEvent::block(identity, endpoint, counter.value, duration));

        Ok(ViolationOutcome {
            count: counter.value,
            blocked: true,
        })
    }

    /// Current violation count of an identity, zero when none are recorded
    pub async fn violations(&self, identity: &str) -> StoreResult<u64> {
        let key = self.keys.violations(identity);
        match self.store.get(&key).await? {
            Some(value) => value.parse().map_err(|_| StoreError::NotAnInteger(key)),
            None => Ok(0),
        }
    }

    /// Forget all violations of an identity
    pub async fn clear(&self, identity: &str) -> StoreResult<()> {
        self.store.delete(&self.keys.violations(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::store::{Counter, MemoryStore, MockCounterStore};

    fn policy(threshold: u64) -> BlockConfig {
        BlockConfig {
            threshold,
            duration_ms: 24 * 60 * 60 * 1000,
        }
    }

    fn accountant(store: Arc<dyn CounterStore>, threshold: u64) -> ViolationAccountant {
        ViolationAccountant::new(store, Keyspace::new("test:"), policy(threshold), AuditSink::disabled())
    }

    #[tokio::test]
    async fn blocks_at_threshold() {
        let store = Arc::new(MemoryStore::new());
        let accountant = accountant(store.clone(), 3);

        for expected in 1..3 {
            let outcome = accountant.record_violation("1.2.3.4", "/x").await.unwrap();
            assert_eq!(outcome, ViolationOutcome { count: expected, blocked: false });
        }
        assert_eq!(store.get("test:blocked:1.2.3.4").await.unwrap(), None);

        let outcome = accountant.record_violation("1.2.3.4", "/x").await.unwrap();
        assert_eq!(outcome, ViolationOutcome { count: 3, blocked: true });
        assert_eq!(
            store.get("test:blocked:1.2.3.4").await.unwrap().as_deref(),
            Some(BLOCKED_MARKER)
        );
        assert_eq!(accountant.violations("1.2.3.4").await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn violation_window_is_anchored_at_first_offense() {
        let store = Arc::new(MemoryStore::new());
        let accountant = accountant(store.clone(), 100);
        let day = Duration::from_secs(24 * 60 * 60);

        accountant.record_violation("a", "/x").await.unwrap();
        tokio::time::advance(Duration::from_secs(3_600)).await;
        accountant.record_violation("a", "/x").await.unwrap();

        let ttl = store.ttl("test:violations:a").await.unwrap();
        assert_eq!(ttl, day - Duration::from_secs(3_600));

        tokio::time::advance(day - Duration::from_secs(3_600)).await;
        assert_eq!(accountant.violations("a").await.unwrap(), 0);
        let outcome = accountant.record_violation("a", "/x").await.unwrap();
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn block_flag_failure_is_reported() {
        let mut store = MockCounterStore::new();
        store
            .expect_incr_with_expiry()
            .returning(|_, ttl| Ok(Counter { value: 10, ttl }));
        store
            .expect_set_with_expiry()
            .returning(|_, _, _| Err(StoreError::Unavailable("down".to_string())));
        let accountant = accountant(Arc::new(store), 10);

        let err = accountant.record_violation("a", "/x").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn clear_resets_the_count() {
        let accountant = accountant(Arc::new(MemoryStore::new()), 10);
        accountant.record_violation("a", "/x").await.unwrap();
        accountant.clear("a").await.unwrap();
        assert_eq!(accountant.violations("a").await.unwrap(), 0);
    }
}
