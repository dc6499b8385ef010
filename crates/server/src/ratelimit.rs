//! Fixed-window submission limiting.
//!
//! A window key is `"{identity}:{floor(now / window)}:{route}"`. The store
//! performs the read-compare-increment atomically, so concurrent gateway
//! instances sharing a store never admit more than the configured maximum
//! per key. A failing store admits the request and logs the fault.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counters with one atomic operation.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` unless it already reached `ceiling`.
    ///
    /// Returns the new count, or `None` when refused; a refused call leaves
    /// the counter untouched. `ttl` bounds the key's lifetime from its first
    /// increment.
    async fn increment_below(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, StoreError>;

    /// Short name for readiness reporting.
    fn kind(&self) -> &'static str;
}

const PRUNE_EVERY: u64 = 1024;

/// In-process store for single-instance deployments and tests.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, (u64, Instant)>,
    calls: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop windows whose lifetime has passed.
    pub fn prune(&self) {
        let now = Instant::now();
        self.counters.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_below(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, StoreError> {
        if self.calls.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }

        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert((0, now + ttl));
        let (count, expires_at) = entry.value_mut();
        if *expires_at <= now {
            *count = 0;
            *expires_at = now + ttl;
        }
        if *count >= ceiling {
            return Ok(None);
        }
        *count += 1;
        Ok(Some(*count))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(feature = "redis")]
pub use self::redis_store::RedisCounterStore;

#[cfg(feature = "redis")]
mod redis_store {
    use super::*;
    use redis::aio::ConnectionManager;
    use redis::Script;

    const INCREMENT_BELOW: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return -1
end
current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return current
"#;

    /// Counters kept in Redis; the compare and increment run server-side.
    #[derive(Clone)]
    pub struct RedisCounterStore {
        manager: ConnectionManager,
        script: Arc<Script>,
        prefix: String,
    }

    impl RedisCounterStore {
        pub async fn connect(url: &str) -> Result<Self, StoreError> {
            let client = redis::Client::open(url)
                .map_err(|err| StoreError::Unavailable(format!("redis client: {err}")))?;
            let manager = ConnectionManager::new(client)
                .await
                .map_err(|err| StoreError::Unavailable(format!("redis connect: {err}")))?;
            Ok(Self {
                manager,
                script: Arc::new(Script::new(INCREMENT_BELOW)),
                prefix: "leadgate:rl".into(),
            })
        }
    }

    #[async_trait]
    impl CounterStore for RedisCounterStore {
        async fn increment_below(
            &self,
            key: &str,
            ceiling: u64,
            ttl: Duration,
        ) -> Result<Option<u64>, StoreError> {
            let mut conn = self.manager.clone();
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            let count: i64 = self
                .script
                .key(format!("{}:{key}", self.prefix))
                .arg(ceiling)
                .arg(ttl_ms)
                .invoke_async(&mut conn)
                .await
                .map_err(|err| StoreError::Unavailable(format!("redis eval: {err}")))?;
            Ok(u64::try_from(count).ok())
        }

        fn kind(&self) -> &'static str {
            "redis"
        }
    }
}

/// Result of asking the limiter to admit a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { count: u64 },
    Refused { retry_after_secs: u64 },
    /// Store failed or timed out; admitted without counting.
    Degraded,
}

impl Admission {
    pub fn is_refused(&self) -> bool {
        matches!(self, Admission::Refused { .. })
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    window_secs: u64,
    max_per_window: u64,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        window_secs: u64,
        max_per_window: u64,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            window_secs: window_secs.max(1),
            max_per_window,
            store_timeout,
        }
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub async fn admit(&self, identity: &str, route: &str) -> Admission {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.admit_at(identity, route, now).await
    }

    /// [`admit`](Self::admit) at a given unix time in seconds.
    pub async fn admit_at(&self, identity: &str, route: &str, now_secs: u64) -> Admission {
        let key = window_key(identity, route, now_secs, self.window_secs);
        let ttl = Duration::from_secs(self.window_secs);
        let call = self.store.increment_below(&key, self.max_per_window, ttl);

        let result = tokio::time::timeout(self.store_timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.store_timeout)));

        match result {
            Ok(Some(count)) => Admission::Admitted { count },
            Ok(None) => Admission::Refused {
                retry_after_secs: self.window_secs,
            },
            Err(err) => {
                error!(
                    event = "rate_store_error",
                    store = self.store.kind(),
                    route,
                    error = %err,
                    "rate store failed, request admitted"
                );
                metrics::counter!("leadgate_rate_store_errors_total").increment(1);
                Admission::Degraded
            }
        }
    }
}

pub fn window_key(identity: &str, route: &str, now_secs: u64, window_secs: u64) -> String {
    format!("{identity}:{}:{route}", now_secs / window_secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(store: Arc<dyn CounterStore>, max: u64) -> RateLimiter {
        RateLimiter::new(store, 60, max, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn refuses_the_attempt_after_the_maximum() {
        let limiter = limiter(Arc::new(MemoryCounterStore::new()), 3);
        for expected in 1..=3 {
            assert_eq!(
                limiter.admit_at("1.2.3.4", "form", 120).await,
                Admission::Admitted { count: expected }
            );
        }
        assert_eq!(
            limiter.admit_at("1.2.3.4", "form", 179).await,
            Admission::Refused {
                retry_after_secs: 60
            }
        );
    }

    #[tokio::test]
    async fn refusals_do_not_increment() {
        let store = Arc::new(MemoryCounterStore::new());
        let ttl = Duration::from_secs(60);
        assert_eq!(store.increment_below("k", 1, ttl).await, Ok(Some(1)));
        assert_eq!(store.increment_below("k", 1, ttl).await, Ok(None));
        assert_eq!(store.increment_below("k", 2, ttl).await, Ok(Some(2)));
    }

    #[tokio::test]
    async fn windows_routes_and_identities_are_independent() {
        let limiter = limiter(Arc::new(MemoryCounterStore::new()), 1);
        assert!(!limiter.admit_at("a", "form", 0).await.is_refused());
        assert!(limiter.admit_at("a", "form", 59).await.is_refused());
        assert!(!limiter.admit_at("a", "form", 60).await.is_refused());
        assert!(!limiter.admit_at("a", "contact", 59).await.is_refused());
        assert!(!limiter.admit_at("b", "form", 59).await.is_refused());
    }

    #[test]
    fn window_key_shape() {
        assert_eq!(window_key("unknown", "form", 125, 60), "unknown:2:form");
    }

    #[tokio::test]
    async fn concurrent_admissions_never_exceed_the_maximum() {
        let limiter = Arc::new(limiter(Arc::new(MemoryCounterStore::new()), 10));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.admit_at("x", "form", 0).await })
            })
            .collect();
        let mut admitted = 0;
        for handle in handles {
            if !handle.await.unwrap().is_refused() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    struct Broken;

    #[async_trait]
    impl CounterStore for Broken {
        async fn increment_below(&self, _: &str, _: u64, _: Duration) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn kind(&self) -> &'static str {
            "broken"
        }
    }

    struct Hanging;

    #[async_trait]
    impl CounterStore for Hanging {
        async fn increment_below(&self, _: &str, _: u64, _: Duration) -> Result<Option<u64>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Some(1))
        }

        fn kind(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn store_failure_admits() {
        let limiter = limiter(Arc::new(Broken), 1);
        assert_eq!(limiter.admit_at("a", "form", 0).await, Admission::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeout_admits() {
        let limiter = limiter(Arc::new(Hanging), 1);
        assert_eq!(limiter.admit_at("a", "form", 0).await, Admission::Degraded);
    }

    #[tokio::test]
    async fn expired_windows_are_pruned() {
        let store = MemoryCounterStore::new();
        store
            .increment_below("old", 5, Duration::from_millis(0))
            .await
            .unwrap();
        store
            .increment_below("live", 5, Duration::from_secs(60))
            .await
            .unwrap();
        store.prune();
        assert_eq!(store.len(), 1);
    }
}
