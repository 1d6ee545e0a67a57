use std::sync::Arc;

use crate::store::{CounterStore, Keyspace, StoreError, StoreResult};

/// Outcome of a block check
#[derive(Debug)]
pub enum GateStatus {
    /// No block flag for the identity
    Open,
    /// The identity is blocked
    Blocked,
    /// The store could not be consulted; treated as open
    Degraded(StoreError),
}

/// Pre-route check against the block flags in the counter store
pub struct BlockGate {
    /// Shared counter store
    store: Arc<dyn CounterStore>,
    keys: Keyspace,
}

impl BlockGate {
    /// Create a new block gate instance
    pub fn new(store: Arc<dyn CounterStore>, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    /// Check whether an identity is blocked
    pub async fn status(&self, identity: &str) -> GateStatus {
        match self.store.get(&self.keys.blocked(identity)).await {
            Ok(Some(_)) => GateStatus::Blocked,
            Ok(None) => GateStatus::Open,
            Err(e) => GateStatus::Degraded(e),
        }
    }

    /// Whether an identity is blocked; store failures count as not blocked
    pub async fn is_blocked(&self, identity: &str) -> bool {
        matches!(self.status(identity).await, GateStatus::Blocked)
    }

    /// Remove the block flag of an identity
    pub async fn unblock(&self, identity: &str) -> StoreResult<()> {
        self.store.delete(&self.keys.blocked(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MockCounterStore};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn blocked_until_flag_expires() {
        let store = Arc::new(MemoryStore::new());
        let gate = BlockGate::new(store.clone(), Keyspace::new("test:"));

        assert!(!gate.is_blocked("1.2.3.4").await);
        store
            .set_with_expiry("test:blocked:1.2.3.4", "true", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(gate.status("1.2.3.4").await, GateStatus::Blocked));
        assert!(!gate.is_blocked("5.6.7.8").await);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!gate.is_blocked("1.2.3.4").await);
    }

    #[tokio::test]
    async fn unblock_removes_flag() {
        let store = Arc::new(MemoryStore::new());
        let gate = BlockGate::new(store.clone(), Keyspace::new("test:"));
        store
            .set_with_expiry("test:blocked:a", "true", Duration::from_secs(60))
            .await
            .unwrap();

        gate.unblock("a").await.unwrap();
        assert!(!gate.is_blocked("a").await);
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let mut store = MockCounterStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));
        let gate = BlockGate::new(Arc::new(store), Keyspace::default());

        assert!(matches!(gate.status("a").await, GateStatus::Degraded(_)));
        assert!(!gate.is_blocked("a").await);
    }
}
