use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::Cache;
use crate::codec::PackedRules;
use crate::config::EngineConfig;
use crate::types::UserId;

/// Default lifetime of a cached rule set.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// In-memory cache for packed rule sets.
///
/// A simple LRU with lazy TTL expiry: expired entries are dropped when they
/// are next read or when a write prunes the table. No background task runs.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<CacheState>>,
    capacity: usize,
    ttl: Option<Duration>,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<UserId, CacheEntry>,
    order: VecDeque<UserId>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    rules: PackedRules,
    updated_at: Instant,
}

impl MemoryCache {
    /// Creates a new cache with the given capacity and [`DEFAULT_TTL`].
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            })),
            capacity,
            ttl: Some(DEFAULT_TTL),
        }
    }

    /// Creates a cache sized and timed from `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.cache_capacity).with_ttl(config.cache_ttl())
    }

    /// Configures the time-to-live for cache entries.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Disables expiry; entries then only leave through eviction or
    /// invalidation.
    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Returns the number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("poisoned lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_key(state: &mut CacheState, key: &UserId) {
        if state.entries.remove(key).is_some() {
            state.order.retain(|existing| existing != key);
        }
    }

    fn touch(state: &mut CacheState, key: &UserId) {
        state.order.retain(|existing| existing != key);
        state.order.push_back(key.clone());
    }

    fn is_expired(entry: &CacheEntry, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(entry.updated_at) > ttl
    }

    fn prune_expired(state: &mut CacheState, ttl: Duration, now: Instant) {
        state
            .entries
            .retain(|_, entry| !Self::is_expired(entry, ttl, now));
        let CacheState { entries, order } = state;
        order.retain(|key| entries.contains_key(key));
    }

    fn evict_if_needed(state: &mut CacheState, capacity: usize) {
        if capacity == 0 {
            state.entries.clear();
            state.order.clear();
            return;
        }

        while state.entries.len() > capacity {
            if let Some(key) = state.order.pop_front() {
                state.entries.remove(&key);
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_rules(&self, user: &UserId) -> Option<PackedRules> {
        if self.capacity == 0 {
            return None;
        }

        let now = Instant::now();
        let mut guard = self.inner.lock().expect("poisoned lock");

        if let Some(ttl) = self.ttl
            && let Some(entry) = guard.entries.get(user)
            && Self::is_expired(entry, ttl, now)
        {
            Self::remove_key(&mut guard, user);
            return None;
        }

        let rules = guard.entries.get(user).map(|entry| entry.rules.clone());
        if rules.is_some() {
            Self::touch(&mut guard, user);
        }
        rules
    }

    async fn set_rules(&self, user: &UserId, rules: PackedRules) {
        if self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let mut guard = self.inner.lock().expect("poisoned lock");

        if let Some(ttl) = self.ttl {
            Self::prune_expired(&mut guard, ttl, now);
        }

        guard.entries.insert(
            user.clone(),
            CacheEntry {
                rules,
                updated_at: now,
            },
        );
        Self::touch(&mut guard, user);
        Self::evict_if_needed(&mut guard, self.capacity);
    }

    async fn invalidate_user(&self, user: &UserId) {
        let mut guard = self.inner.lock().expect("poisoned lock");
        Self::remove_key(&mut guard, user);
    }

    async fn clear(&self) {
        let mut guard = self.inner.lock().expect("poisoned lock");
        guard.entries.clear();
        guard.order.clear();
    }
}
