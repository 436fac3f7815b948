use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::intent::{CommandIntent, ResolutionMode};

struct Entry<V> {
    value: V,
    inserted: Instant,
    tick: u64,
}

/// LRU map whose entries also expire a fixed time after insertion.
///
/// Recency is tracked with a monotonically increasing tick; `order` maps
/// tick to key so the least recently used key is always the first entry.
pub struct TtlLruCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    order: BTreeMap<u64, K>,
    capacity: usize,
    ttl: Duration,
    next_tick: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            capacity: capacity.max(1),
            ttl,
            next_tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch and refresh recency. Expired entries are removed and miss.
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = {
            let entry = self.entries.get(key)?;
            now.saturating_duration_since(entry.inserted) > self.ttl
        };
        if expired {
            self.remove(key);
            return None;
        }

        let tick = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        Some(entry.value.clone())
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.remove(&key);

        let tick = self.bump();
        self.order.insert(tick, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                tick,
            },
        );

        while self.entries.len() > self.capacity {
            match self.order.pop_first() {
                Some((_, lru)) => {
                    self.entries.remove(&lru);
                }
                None => break,
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry.value)
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

/// Thread-safe cache of resolved intents keyed by mode and trimmed message.
pub struct IntentCache {
    inner: Mutex<TtlLruCache<(ResolutionMode, String), CommandIntent>>,
}

impl IntentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(TtlLruCache::new(capacity, ttl)),
        }
    }

    pub fn get(&self, mode: ResolutionMode, message: &str) -> Option<CommandIntent> {
        let key = (mode, message.trim().to_string());
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_at(&key, Instant::now())
    }

    pub fn insert(&self, mode: ResolutionMode, message: &str, intent: CommandIntent) {
        let key = (mode, message.trim().to_string());
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_at(key, intent, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
