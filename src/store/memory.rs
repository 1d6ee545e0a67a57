use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Counter, CounterStore, StoreError, StoreResult};

/// Writes between two sweeps of expired keys
const PURGE_INTERVAL: u64 = 1_000;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process counter store
///
/// Each operation runs under a single lock acquisition, which gives the same
/// atomicity as the Redis script. Expiry uses tokio's clock, so tests can
/// move time forward with `tokio::time::advance`. Expired keys are swept
/// every `PURGE_INTERVAL` writes, so identities that never come back do not
/// pile up. Only suitable for a single instance; state is lost on restart.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Remaining lifetime of a key, `None` if absent or without expiry
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired keys
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.lock().await.retain(|_, entry| entry.is_live(now));
    }

    /// Sweep expired keys once every `PURGE_INTERVAL` writes
    fn purge_if_due(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_INTERVAL == 0 {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            tracing::debug!(purged = before - entries.len(), live = entries.len(), "expired keys swept");
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<Counter> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.purge_if_due(&mut entries, now);

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if !entry.is_live(now) {
                    entry.value = "0".to_string();
                    entry.expires_at = None;
                }
            })
            .or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: None,
            });

        let value = entry
            .value
            .parse::<u64>()
            .map_err(|_| StoreError::NotAnInteger(key.to_string()))?
            + 1;
        entry.value = value.to_string();

        let expires_at = *entry.expires_at.get_or_insert(now + ttl);
        Ok(Counter {
            value,
            ttl: expires_at.saturating_duration_since(now),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.purge_if_due(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
