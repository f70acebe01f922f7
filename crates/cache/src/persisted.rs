//! Dedup window cache persisted in page storage, so suppression survives a
//! reload. Stored as a JSON object of `id -> last-sent epoch millis`.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::storage::SafeStorage;

pub struct PersistedWindowCache {
    storage: SafeStorage,
    key: String,
    window_ms: i64,
    retention_ms: i64,
    // Serializes check + register within this process.
    guard: Mutex<()>,
}

impl PersistedWindowCache {
    pub fn new(storage: SafeStorage, key: impl Into<String>, window_ms: u64, retention_ms: u64) -> Self {
        Self {
            storage,
            key: key.into(),
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            retention_ms: i64::try_from(retention_ms).unwrap_or(i64::MAX),
            guard: Mutex::new(()),
        }
    }

    /// Current cache contents. Unreadable or malformed state counts as empty;
    /// entries that are not integer timestamps are dropped.
    pub fn entries(&self) -> BTreeMap<String, i64> {
        let raw: BTreeMap<String, Value> = self.storage.get_json(&self.key).unwrap_or_default();
        raw.into_iter()
            .filter_map(|(id, ts)| ts.as_i64().map(|ts| (id, ts)))
            .collect()
    }

    pub fn is_duplicate(&self, id: &str, now_ms: i64) -> bool {
        if id.is_empty() {
            return false;
        }
        match self.entries().get(id) {
            Some(&last) if last != 0 => now_ms.saturating_sub(last) < self.window_ms,
            _ => false,
        }
    }

    /// Record `id` at `now_ms`, drop entries older than the retention age and
    /// write the cache back.
    pub fn register(&self, id: &str, now_ms: i64) {
        if id.is_empty() {
            return;
        }
        let mut entries = self.entries();
        entries.insert(id.to_string(), now_ms);
        entries.retain(|_, ts| now_ms.saturating_sub(*ts) <= self.retention_ms);
        self.storage.set_json(&self.key, &entries);
    }

    /// Check and register under one guard. Returns `false` when `id` is still
    /// inside its window.
    pub fn try_register(&self, id: &str, now_ms: i64) -> bool {
        let _guard = self.guard.lock();
        if self.is_duplicate(id, now_ms) {
            return false;
        }
        self.register(id, now_ms);
        true
    }
}
