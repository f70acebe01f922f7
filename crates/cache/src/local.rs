//! In-process dedup window cache backed by DashMap.
//! Remembers when each key was last let through; lost when the page unloads.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Per-key "last sent" timestamps with a fixed suppression window.
pub struct WindowCache {
    store: DashMap<String, i64>,
    window_ms: i64,
}

impl WindowCache {
    pub fn new(window_ms: u64) -> Self {
        Self {
            store: DashMap::new(),
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Whether `key` was let through less than one window ago.
    pub fn is_duplicate(&self, key: &str, now_ms: i64) -> bool {
        match self.store.get(key) {
            Some(last) => now_ms.saturating_sub(*last) < self.window_ms,
            None => false,
        }
    }

    /// Check and register in one step. Returns `false` when the key is still
    /// inside its window; otherwise records `now_ms` and returns `true`.
    /// The entry lock is held across both, so two callers racing on the same
    /// key cannot both pass.
    pub fn try_register(&self, key: &str, now_ms: i64) -> bool {
        self.evict_expired(now_ms);
        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now_ms.saturating_sub(*entry.get()) < self.window_ms {
                    return false;
                }
                entry.insert(now_ms);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now_ms);
                true
            }
        }
    }

    /// Drop keys whose window has passed; they would be let through anyway.
    pub fn evict_expired(&self, now_ms: i64) {
        self.store
            .retain(|_, last| now_ms.saturating_sub(*last) < self.window_ms);
    }

    pub fn last_seen(&self, key: &str) -> Option<i64> {
        self.store.get(key).map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
