use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Key/value cache whose entries expire.
///
/// Callers hold an `Arc<dyn TtlCache<V>>` so a shared cache can replace the
/// in-process one without touching them.
#[async_trait]
pub trait TtlCache<V: Clone + Send + Sync + 'static>: Send + Sync {
    async fn get(&self, key: &str) -> Option<V>;

    async fn set(&self, key: &str, value: V, ttl: Duration);

    /// Read and replace one entry under a single lock. `f` sees the live
    /// value, if any; returning `Some` stores it with a fresh `ttl`,
    /// returning `None` leaves the entry untouched.
    async fn update(
        &self,
        key: &str,
        ttl: Duration,
        f: &(dyn for<'a> Fn(Option<&'a V>) -> Option<V> + Send + Sync),
    ) -> Option<V>;

    /// Drop expired entries, returning how many were removed
    async fn sweep(&self) -> usize;
}

#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

impl<V> CachedEntry<V> {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-memory cache with per-entry TTL
pub struct InMemoryTtlCache<V> {
    entries: Arc<RwLock<HashMap<String, CachedEntry<V>>>>,
}

impl<V> InMemoryTtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V> Default for InMemoryTtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> TtlCache<V> for InMemoryTtlCache<V> {
    async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_valid(Utc::now()) => Some(entry.value.clone()),
            Some(_) => {
                debug!("⚠ Cache entry stale: {}", key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) {
        let expires_at = expiry_after(ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CachedEntry { value, expires_at });
    }

    async fn update(
        &self,
        key: &str,
        ttl: Duration,
        f: &(dyn for<'a> Fn(Option<&'a V>) -> Option<V> + Send + Sync),
    ) -> Option<V> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        let current = entries
            .get(key)
            .filter(|entry| entry.is_valid(now))
            .map(|entry| &entry.value);
        let next = f(current)?;

        entries.insert(
            key.to_string(),
            CachedEntry {
                value: next.clone(),
                expires_at: expiry_after(ttl),
            },
        );
        Some(next)
    }

    async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        let removed = before - entries.len();

        if removed > 0 {
            info!("🧹 Cleaned up {} expired cache entries", removed);
        }
        removed
    }
}

/// Counts attempts per key inside a fixed window
pub struct AttemptLimiter {
    cache: Arc<dyn TtlCache<u32>>,
    max_attempts: u32,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(cache: Arc<dyn TtlCache<u32>>, max_attempts: u32, window: Duration) -> Self {
        Self {
            cache,
            max_attempts,
            window,
        }
    }

    /// Record an attempt; false once the key has used up its window
    pub async fn try_acquire(&self, key: &str) -> bool {
        let max_attempts = self.max_attempts;
        // The window restarts on every accepted attempt.
        self.cache
            .update(key, self.window, &|used: Option<&u32>| {
                let used = used.copied().unwrap_or(0);
                (used < max_attempts).then_some(used + 1)
            })
            .await
            .is_some()
    }
}
