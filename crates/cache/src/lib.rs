#![warn(clippy::unwrap_used)]

pub mod local;
pub mod persisted;
pub mod storage;

pub use local::WindowCache;
pub use persisted::PersistedWindowCache;
pub use storage::{JsonFileStorage, MemoryStorage, SafeStorage, StorageBackend, StorageTier, UnavailableStorage};
