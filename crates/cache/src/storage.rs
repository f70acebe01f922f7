//! Key-value storage adapter over the two page storage tiers.
//!
//! Backends report failures; [`SafeStorage`] swallows them so callers only
//! ever see "value absent" or "write ignored".

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use leadlimpo_core::{TrackError, TrackResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Which storage tier a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    /// Survives reloads within one browsing session.
    Session,
    /// Survives across sessions.
    Persistent,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::Session => f.write_str("session"),
            StorageTier::Persistent => f.write_str("persistent"),
        }
    }
}

/// Raw storage backend. Implementations may fail (quota, disabled storage).
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> TrackResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> TrackResult<()>;
}

/// Process-local backend.
#[derive(Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> TrackResult<Option<String>> {
        Ok(self.items.get(key).map(|v| v.clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> TrackResult<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Backend that refuses every access, like a browser with storage disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStorage;

impl StorageBackend for UnavailableStorage {
    fn get_item(&self, key: &str) -> TrackResult<Option<String>> {
        Err(TrackError::Storage(format!("storage unavailable reading '{key}'")))
    }

    fn set_item(&self, key: &str, _value: &str) -> TrackResult<()> {
        Err(TrackError::Storage(format!("storage unavailable writing '{key}'")))
    }
}

/// Backend persisted to a JSON object on disk. Every write rewrites the file.
pub struct JsonFileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    /// Open `path`, loading existing entries. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> TrackResult<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for JsonFileStorage {
    fn get_item(&self, key: &str) -> TrackResult<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> TrackResult<()> {
        let mut items = self.items.lock();
        items.insert(key.to_string(), value.to_string());
        let json = serde_json::to_string_pretty(&*items)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Failure-tolerant handle over one storage tier.
#[derive(Clone)]
pub struct SafeStorage {
    tier: StorageTier,
    backend: Arc<dyn StorageBackend>,
}

impl SafeStorage {
    pub fn new(tier: StorageTier, backend: Arc<dyn StorageBackend>) -> Self {
        Self { tier, backend }
    }

    pub fn in_memory(tier: StorageTier) -> Self {
        Self::new(tier, Arc::new(MemoryStorage::new()))
    }

    pub fn unavailable(tier: StorageTier) -> Self {
        Self::new(tier, Arc::new(UnavailableStorage))
    }

    pub fn tier(&self) -> StorageTier {
        self.tier
    }

    /// Read a value. Failures degrade to `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.backend.get_item(key) {
            Ok(value) => value,
            Err(e) => {
                debug!(tier = %self.tier, key, error = %e, "storage read ignored");
                None
            }
        }
    }

    /// Read a non-empty value.
    pub fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Write a value. Failures are logged and dropped.
    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.set_item(key, value) {
            debug!(tier = %self.tier, key, error = %e, "storage write ignored");
        }
    }

    /// Read and decode a JSON value. Missing, empty or malformed entries
    /// yield `None`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_non_empty(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(tier = %self.tier, key, error = %e, "discarding malformed stored value");
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.set(key, &json),
            Err(e) => debug!(tier = %self.tier, key, error = %e, "storage encode ignored"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_memory_round_trip() {
        let storage = SafeStorage::in_memory(StorageTier::Session);
        assert_eq!(storage.get("missing"), None);
        storage.set("leadlimpo_session_id", "abc");
        assert_eq!(storage.get("leadlimpo_session_id").as_deref(), Some("abc"));
    }

    #[test]
    fn test_unavailable_storage_degrades() {
        let storage = SafeStorage::unavailable(StorageTier::Persistent);
        storage.set("k", "v");
        assert_eq!(storage.get("k"), None);
        assert_eq!(storage.get_json::<HashMap<String, i64>>("k"), None);
    }

    #[test]
    fn test_malformed_json_is_absent() {
        let storage = SafeStorage::in_memory(StorageTier::Session);
        storage.set("utm_params", "{not json");
        assert_eq!(storage.get_json::<HashMap<String, String>>("utm_params"), None);

        storage.set("utm_params", "");
        assert_eq!(storage.get_json::<HashMap<String, String>>("utm_params"), None);
    }

    #[test]
    fn test_json_file_storage_survives_reopen() {
        let path = std::env::temp_dir().join(format!("leadlimpo-{}.json", uuid::Uuid::new_v4()));

        {
            let backend = JsonFileStorage::open(&path).unwrap();
            let storage = SafeStorage::new(StorageTier::Persistent, Arc::new(backend));
            storage.set("leadlimpo_event_cache", r#"{"leadlimpo_lead_s_f":1000}"#);
        }

        let reopened = JsonFileStorage::open(&path).unwrap();
        assert_eq!(
            reopened.get_item("leadlimpo_event_cache").unwrap().as_deref(),
            Some(r#"{"leadlimpo_lead_s_f":1000}"#)
        );
        std::fs::remove_file(reopened.path()).unwrap();
    }

    #[test]
    fn test_json_file_storage_rejects_corrupt_file() {
        let path = std::env::temp_dir().join(format!("leadlimpo-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            JsonFileStorage::open(&path),
            Err(TrackError::Serialization(_))
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
