use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{
    AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisResult,
    Script,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

use super::{Counter, CounterStore, StoreError, StoreResult};
use crate::config::RedisConfig;
use crate::utils::GuardResult;

/// INCR and PEXPIRE in one server-side step. The expiry is attached when the
/// increment creates the key, or when the key somehow lost its expiry, so a
/// window can never become permanent. Returns `{count, pttl}`.
const INCR_WITH_EXPIRY: &str = r#"
local current = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if current == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

const BACKOFF_STEP: Duration = Duration::from_millis(50);

/// Delay before reconnect attempt number `attempt` (starting at 1)
pub fn reconnect_delay(attempt: u32, max: Duration) -> Duration {
    BACKOFF_STEP.saturating_mul(attempt).min(max)
}

/// Counter store backed by Redis
///
/// Holds one multiplexed [`ConnectionManager`] shared by all requests. The
/// manager reconnects on its own once established; if Redis is down at
/// startup a background task keeps trying and every operation reports
/// [`StoreError::Unavailable`] until it succeeds.
pub struct RedisStore {
    /// Shared connection, `None` until the first successful connect
    conn: Arc<RwLock<Option<ConnectionManager>>>,
    incr_script: Script,
    command_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis. Never fails because Redis is unreachable; only an
    /// invalid connection configuration is an error.
    pub async fn connect(config: &RedisConfig) -> GuardResult<Self> {
        let client = Client::open(connection_info(config))?;
        let conn = Arc::new(RwLock::new(None));
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        match timeout(connect_timeout, ConnectionManager::new(client.clone())).await {
            Ok(Ok(manager)) => {
                tracing::info!(host = %config.host, port = config.port, "Connected to Redis");
                *conn.write().await = Some(manager);
            }
            Ok(Err(e)) => {
                tracing::warn!(host = %config.host, port = config.port, error = %e, "Redis connection failed, retrying in background");
                tokio::spawn(reconnect(client, conn.clone(), connect_timeout, max_backoff(config)));
            }
            Err(_) => {
                tracing::warn!(host = %config.host, port = config.port, "Redis connection timed out, retrying in background");
                tokio::spawn(reconnect(client, conn.clone(), connect_timeout, max_backoff(config)));
            }
        }

        Ok(Self {
            conn,
            incr_script: Script::new(INCR_WITH_EXPIRY),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        })
    }

    /// Whether a connection has been established
    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Unavailable("not connected to redis".to_string()))
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match timeout(self.command_timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.command_timeout)),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<Counter> {
        let mut conn = self.connection().await?;

        let mut invocation = self.incr_script.prepare_invoke();
        invocation.key(key).arg(millis(ttl));
        let (value, pttl): (i64, i64) = self.run(invocation.invoke_async(&mut conn)).await?;

        Ok(Counter {
            value: u64::try_from(value).unwrap_or(0),
            ttl: Duration::from_millis(u64::try_from(pttl).unwrap_or(0)),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection().await?;
        self.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(millis(ttl));
        self.run(cmd.query_async::<_, ()>(&mut conn)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        self.run(conn.del::<_, ()>(key)).await
    }
}

/// Keep connecting until Redis answers, then publish the connection
async fn reconnect(
    client: Client,
    slot: Arc<RwLock<Option<ConnectionManager>>>,
    connect_timeout: Duration,
    max_backoff: Duration,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(reconnect_delay(attempt, max_backoff)).await;

        match timeout(connect_timeout, ConnectionManager::new(client.clone())).await {
            Ok(Ok(manager)) => {
                tracing::info!(attempt = attempt, "Connected to Redis");
                *slot.write().await = Some(manager);
                return;
            }
            Ok(Err(e)) => tracing::debug!(attempt = attempt, error = %e, "Redis reconnect failed"),
            Err(_) => tracing::debug!(attempt = attempt, "Redis reconnect timed out"),
        }
    }
}

fn connection_info(config: &RedisConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: 0,
            username: None,
            password: config.password.clone().filter(|p| !p.is_empty()),
        },
    }
}

fn max_backoff(config: &RedisConfig) -> Duration {
    Duration::from_millis(config.max_backoff_ms)
}

/// Milliseconds for PX/PEXPIRE; zero would delete the key instead
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
