//! Page host: everything the tracker reads from or writes to the surrounding
//! page: location, the two storage tiers, the pixel global, the data layer and
//! the debug overrides.
//!
//! A host without a location models "not running in a page": every pipeline
//! treats it as a silent no-op.

use std::sync::Arc;

use leadlimpo_cache::{SafeStorage, StorageTier};
use leadlimpo_core::event_bus::InMemoryDataLayer;
use leadlimpo_core::{DataLayerSink, PixelSink, TrackError, TrackResult};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use url::Url;

pub struct PageHost {
    location: Option<Url>,
    session: SafeStorage,
    persistent: SafeStorage,
    pixel: RwLock<Option<Arc<dyn PixelSink>>>,
    data_layer: Mutex<Option<Arc<dyn DataLayerSink>>>,
    global_debug_flag: RwLock<Option<Value>>,
    debug_attribute: Option<String>,
    crypto_available: bool,
}

impl PageHost {
    /// Page at `location` with in-memory storage tiers and no sinks loaded.
    pub fn new(location: Url) -> Self {
        Self {
            location: Some(location),
            session: SafeStorage::in_memory(StorageTier::Session),
            persistent: SafeStorage::in_memory(StorageTier::Persistent),
            pixel: RwLock::new(None),
            data_layer: Mutex::new(None),
            global_debug_flag: RwLock::new(None),
            debug_attribute: None,
            crypto_available: true,
        }
    }

    pub fn parse(location: &str) -> TrackResult<Self> {
        let url = Url::parse(location)
            .map_err(|e| TrackError::Config(format!("invalid page url '{location}': {e}")))?;
        Ok(Self::new(url))
    }

    /// Host with no page context. Storage is unreachable and nothing is sent.
    pub fn detached() -> Self {
        Self {
            location: None,
            session: SafeStorage::unavailable(StorageTier::Session),
            persistent: SafeStorage::unavailable(StorageTier::Persistent),
            pixel: RwLock::new(None),
            data_layer: Mutex::new(None),
            global_debug_flag: RwLock::new(None),
            debug_attribute: None,
            crypto_available: false,
        }
    }

    pub fn with_session_storage(mut self, storage: SafeStorage) -> Self {
        self.session = storage;
        self
    }

    pub fn with_persistent_storage(mut self, storage: SafeStorage) -> Self {
        self.persistent = storage;
        self
    }

    pub fn with_pixel(self, sink: Arc<dyn PixelSink>) -> Self {
        *self.pixel.write() = Some(sink);
        self
    }

    pub fn with_data_layer(self, sink: Arc<dyn DataLayerSink>) -> Self {
        *self.data_layer.lock() = Some(sink);
        self
    }

    /// Value of the tracker script tag's `data-leadlimpo-debug` attribute.
    pub fn with_debug_attribute(mut self, value: impl Into<String>) -> Self {
        self.debug_attribute = Some(value.into());
        self
    }

    pub fn with_global_debug_flag(self, value: Value) -> Self {
        *self.global_debug_flag.write() = Some(value);
        self
    }

    /// Page without a usable digest primitive.
    pub fn without_crypto(mut self) -> Self {
        self.crypto_available = false;
        self
    }

    pub fn is_page(&self) -> bool {
        self.location.is_some()
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    pub fn hostname(&self) -> &str {
        self.location
            .as_ref()
            .and_then(|url| url.host_str())
            .unwrap_or("")
    }

    pub fn path(&self) -> Option<&str> {
        self.location.as_ref().map(|url| url.path())
    }

    /// Decoded query parameters in page order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match &self.location {
            Some(url) => url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Loopback, `localhost` and `.local` hosts are development hosts.
    pub fn is_production(&self) -> bool {
        if !self.is_page() {
            return false;
        }
        let host = self.hostname();
        !(host == "localhost" || host.starts_with("127.") || host.ends_with(".local"))
    }

    pub fn session_storage(&self) -> &SafeStorage {
        &self.session
    }

    pub fn persistent_storage(&self) -> &SafeStorage {
        &self.persistent
    }

    /// The pixel global, if the page has loaded it.
    pub fn pixel(&self) -> Option<Arc<dyn PixelSink>> {
        if !self.is_page() {
            return None;
        }
        self.pixel.read().clone()
    }

    /// Simulates the pixel script finishing its load.
    pub fn install_pixel(&self, sink: Arc<dyn PixelSink>) {
        *self.pixel.write() = Some(sink);
    }

    /// The data layer if one exists, without creating it.
    pub fn data_layer(&self) -> Option<Arc<dyn DataLayerSink>> {
        if !self.is_page() {
            return None;
        }
        self.data_layer.lock().clone()
    }

    /// The data layer, created empty if the page has none yet.
    pub fn ensure_data_layer(&self) -> Option<Arc<dyn DataLayerSink>> {
        if !self.is_page() {
            return None;
        }
        let mut slot = self.data_layer.lock();
        let layer = slot.get_or_insert_with(|| Arc::new(InMemoryDataLayer::new()) as Arc<dyn DataLayerSink>);
        Some(Arc::clone(layer))
    }

    pub fn global_debug_flag(&self) -> Option<Value> {
        self.global_debug_flag.read().clone()
    }

    pub fn set_global_debug_flag(&self, value: Option<Value>) {
        *self.global_debug_flag.write() = value;
    }

    pub fn debug_attribute(&self) -> Option<&str> {
        self.debug_attribute.as_deref()
    }

    pub fn crypto_available(&self) -> bool {
        self.is_page() && self.crypto_available
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use leadlimpo_core::event_bus::capture_pixel;

    #[test]
    fn test_production_detection() {
        for (url, production) in [
            ("https://leadlimpo.com.br/quiz", true),
            ("http://localhost:3000/", false),
            ("http://127.0.0.1:8080/", false),
            ("http://my-box.local/", false),
            ("https://local.example.com/", true),
        ] {
            assert_eq!(PageHost::parse(url).unwrap().is_production(), production, "{url}");
        }
        assert!(!PageHost::detached().is_production());
    }

    #[test]
    fn test_query_pairs_decoded() {
        let host = PageHost::parse("https://x.com/?utm_source=ig&utm_campaign=promo%20verao").unwrap();
        assert_eq!(
            host.query_pairs(),
            vec![
                ("utm_source".to_string(), "ig".to_string()),
                ("utm_campaign".to_string(), "promo verao".to_string()),
            ]
        );
    }

    #[test]
    fn test_data_layer_created_lazily() {
        let host = PageHost::parse("https://x.com/").unwrap();
        assert!(host.data_layer().is_none());
        let created = host.ensure_data_layer().unwrap();
        created.push(serde_json::Map::new()).unwrap();
        assert_eq!(host.data_layer().unwrap().entries().len(), 1);
    }

    #[test]
    fn test_detached_host_exposes_nothing() {
        let host = PageHost::detached().with_pixel(capture_pixel());
        assert!(!host.is_page());
        assert!(host.pixel().is_none());
        assert!(host.ensure_data_layer().is_none());
        assert!(!host.crypto_available());
        assert!(host.query_pairs().is_empty());
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        assert!(matches!(PageHost::parse("not a url"), Err(TrackError::Config(_))));
    }
}
