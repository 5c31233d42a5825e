//! Sliding-window counter stores.
//!
//! A store evicts, counts, conditionally inserts and refreshes expiry as one
//! atomic step per key. Redis does it in a Lua script so every gateway
//! instance sees the same count; the memory store holds the `DashMap` entry
//! lock for the duration.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::{StoreBackend, StoreConfig};

/// Store failures. The limiter never surfaces these to callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store round trip exceeded {0:?}")]
    Timeout(Duration),

    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// One admission attempt against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    pub now_ms: i64,
    pub window_ms: i64,
    pub limit: u32,
    pub ttl_ms: i64,
}

/// Outcome of [`WindowStore::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Timestamps inside the window before this request.
    pub count: u64,
    /// Whether this request was inserted.
    pub admitted: bool,
}

#[async_trait]
pub trait WindowStore: Send + Sync + fmt::Debug {
    /// Evict, count and conditionally insert `now` for `key`, atomically.
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowCount, StoreError>;

    fn backend(&self) -> &'static str;

    /// Drop expired keys. Stores with native expiry do nothing.
    fn sweep(&self) -> usize {
        0
    }
}

/// Build the configured store. `None` when limiting is disabled.
pub fn build_store(config: &StoreConfig) -> Result<Option<Arc<dyn WindowStore>>, StoreError> {
    let store: Arc<dyn WindowStore> = match config.backend {
        StoreBackend::Disabled => return Ok(None),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| StoreError::Config("redis backend requires a url".into()))?;
            Arc::new(RedisStore::open(url, Duration::from_millis(config.timeout_ms))?)
        }
    };
    tracing::info!(backend = store.backend(), "Rate limit store ready");
    Ok(Some(store))
}

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, ARGV[5])
    admitted = 1
end
redis.call('PEXPIRE', key, ttl)
return {count, admitted}
"#;

/// Redis sorted-set windows shared by every gateway instance.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    script: redis::Script,
    timeout: Duration,
}

impl RedisStore {
    /// Parse the URL. The connection is opened lazily on first use so the
    /// gateway starts even while Redis is down.
    pub fn open(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: OnceCell::new(),
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
            timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }

    async fn run_script(&self, key: &str, request: WindowRequest) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection().await?;
        let member = format!("{}-{}", request.now_ms, uuid::Uuid::new_v4());

        let (count, admitted): (u64, i64) = self
            .script
            .key(key)
            .arg(request.now_ms)
            .arg(request.window_ms)
            .arg(request.limit)
            .arg(request.ttl_ms)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowCount {
            count,
            admitted: admitted == 1,
        })
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowCount, StoreError> {
        tokio::time::timeout(self.timeout, self.run_script(key, request))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.initialized())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Default)]
struct MemoryWindow {
    stamps: VecDeque<i64>,
    expires_at_ms: i64,
}

/// Process-local windows for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, MemoryWindow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    fn sweep_at(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires_at_ms > now_ms);
        before.saturating_sub(self.windows.len())
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowCount, StoreError> {
        let mut window = self.windows.entry(key.to_string()).or_default();

        if window.expires_at_ms <= request.now_ms {
            window.stamps.clear();
        }
        let cutoff = request.now_ms.saturating_sub(request.window_ms);
        window.stamps.retain(|stamp| *stamp > cutoff);

        let count = window.stamps.len() as u64;
        let admitted = count < u64::from(request.limit);
        if admitted {
            window.stamps.push_back(request.now_ms);
        }
        window.expires_at_ms = request.now_ms.saturating_add(request.ttl_ms);

        Ok(WindowCount { count, admitted })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn sweep(&self) -> usize {
        self.sweep_at(chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(now_ms: i64, limit: u32) -> WindowRequest {
        WindowRequest {
            now_ms,
            window_ms: 1_000,
            limit,
            ttl_ms: 11_000,
        }
    }

    #[tokio::test]
    async fn test_memory_admits_up_to_limit() {
        let store = MemoryStore::new();

        for i in 0..3 {
            let outcome = store.record("k", request(1_000 + i, 3)).await.unwrap();
            assert!(outcome.admitted);
            assert_eq!(outcome.count, i as u64);
        }

        let rejected = store.record("k", request(1_010, 3)).await.unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.count, 3);
    }

    #[tokio::test]
    async fn test_memory_window_slides() {
        let store = MemoryStore::new();
        assert!(store.record("k", request(0, 2)).await.unwrap().admitted);
        assert!(store.record("k", request(500, 2)).await.unwrap().admitted);
        assert!(!store.record("k", request(900, 2)).await.unwrap().admitted);

        // The stamp at 0 falls out at exactly now - window.
        let outcome = store.record("k", request(1_000, 2)).await.unwrap();
        assert!(outcome.admitted);
        assert_eq!(outcome.count, 1);

        // Rejected requests are not recorded.
        assert!(!store.record("k", request(1_400, 2)).await.unwrap().admitted);
        assert!(store.record("k", request(1_501, 2)).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_memory_keys_are_independent() {
        let store = MemoryStore::new();
        assert!(store.record("a", request(0, 1)).await.unwrap().admitted);
        assert!(!store.record("a", request(1, 1)).await.unwrap().admitted);
        assert!(store.record("b", request(1, 1)).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_memory_sweep_drops_expired_keys() {
        let store = MemoryStore::new();
        store.record("old", request(0, 5)).await.unwrap();
        store.record("new", request(20_000, 5)).await.unwrap();

        assert_eq!(store.sweep_at(15_000), 1);
        assert_eq!(store.key_count(), 1);
    }

    #[test]
    fn test_disabled_backend_builds_nothing() {
        let config = StoreConfig {
            backend: StoreBackend::Disabled,
            ..StoreConfig::default()
        };
        assert!(build_store(&config).unwrap().is_none());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            url: None,
            ..StoreConfig::default()
        };
        assert!(matches!(build_store(&config), Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_redis_errors() {
        let store = RedisStore::open("redis://127.0.0.1:1/0", Duration::from_millis(200)).unwrap();
        assert!(store.record("k", request(0, 5)).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_concurrent_records_admit_exactly_limit() {
        let store = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.record("k", request(1_000, 5)).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);

        let next = store.record("k", request(1_000, 5)).await.unwrap();
        assert!(!next.admitted);
        assert_eq!(next.count, 5);
    }
}
