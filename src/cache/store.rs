use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::utils::periodic::PeriodicTask;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
}

struct Inner {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl Inner {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

/// 进程内的 GET 响应缓存，按条目设置过期时间。
///
/// 克隆开销很小，所有克隆共享同一份数据。过期条目在 `get` 时
/// 视为不存在；后台清理只是为了及时释放内存。
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let value = self
            .inner
            .entries
            .get(key)
            .and_then(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));

        match value {
            Some(value) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // 惰性删除已过期的条目
                self.inner
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now));
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.entries.insert(key.into(), entry);
    }

    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    pub fn delete_many<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter()
            .filter(|key| self.delete(key.as_ref()))
            .count()
    }

    /// 当前记录的全部键，可能包含尚未被清理的过期键
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn flush(&self) {
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            keys: self.len(),
        }
    }

    /// 启动后台过期清理，重复调用会替换之前的任务
    pub fn start_sweeper(&self, period: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = PeriodicTask::spawn("cache-sweeper", period, move || {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let removed = inner.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = inner.entries.len(), "Evicted expired cache entries");
            }
            true
        });

        match self.inner.sweeper.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(task) {
                    previous.stop();
                }
            }
            Err(e) => tracing::error!("Cache sweeper lock poisoned: {}", e),
        }
    }

    pub fn sweeper_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .map(|slot| slot.as_ref().is_some_and(PeriodicTask::is_running))
            .unwrap_or(false)
    }

    /// 停止后台清理并清空缓存
    pub fn teardown(&self) {
        if let Ok(mut slot) = self.inner.sweeper.lock() {
            if let Some(task) = slot.take() {
                task.stop();
            }
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time;

    fn cache() -> ResponseCache {
        ResponseCache::new()
    }

    #[tokio::test(start_paused = true)]
    async fn returns_value_until_ttl_elapses() {
        let cache = cache();
        cache.set("cache:/api/stats", json!({"totalAirdrops": 3}), Duration::from_secs(60));
        assert_eq!(cache.get("cache:/api/stats"), Some(json!({"totalAirdrops": 3})));

        time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("cache:/api/stats").is_some());

        time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("cache:/api/stats"), None);
        // 过期条目在读取时被删除
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn zero_ttl_is_never_returned() {
        let cache = cache();
        cache.set("k", json!(1), Duration::ZERO);
        assert!(!cache.has("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn set_overwrites() {
        let cache = cache();
        cache.set("k", json!("old"), Duration::from_secs(10));
        cache.set("k", json!("new"), Duration::from_secs(10));
        assert_eq!(cache.get("k"), Some(json!("new")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let cache = cache();
        cache.set("k", json!(1), Duration::from_secs(10));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(!cache.delete("never-set"));
    }

    #[test]
    fn delete_many_counts_removed() {
        let cache = cache();
        cache.set("a", json!(1), Duration::from_secs(10));
        cache.set("b", json!(2), Duration::from_secs(10));
        assert_eq!(cache.delete_many(["a", "b", "c"]), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn flush_twice_leaves_empty() {
        let cache = cache();
        cache.set("a", json!(1), Duration::from_secs(10));
        cache.flush();
        cache.flush();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = cache();
        cache.set("a", json!(1), Duration::from_secs(10));
        cache.get("a");
        cache.get("a");
        cache.get("b");
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 2,
                misses: 1,
                keys: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keys_include_expired_until_swept() {
        let cache = cache();
        cache.set("short", json!(1), Duration::from_secs(1));
        cache.set("long", json!(2), Duration::from_secs(100));
        time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.keys(), vec!["long".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_in_background() {
        let cache = cache();
        cache.start_sweeper(Duration::from_secs(5));
        cache.set("short", json!(1), Duration::from_secs(1));

        time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());

        cache.teardown();
        assert!(!cache.sweeper_running());
    }
}
