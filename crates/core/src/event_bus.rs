//! Sink seams: the two downstream destinations every funnel event fans out to.
//!
//! The pixel sink is the ad platform's attribution call (`fbq`-style); the
//! data-layer sink is the ordered queue a tag manager scans. Both are traits so
//! hosts can plug in the real page bindings while tests use the capture sinks.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Payload;

/// Call mode of the pixel sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PixelMode {
    /// Standard (named) event.
    #[serde(rename = "track")]
    Track,
    /// Arbitrary custom event.
    #[serde(rename = "trackCustom")]
    TrackCustom,
}

impl PixelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelMode::Track => "track",
            PixelMode::TrackCustom => "trackCustom",
        }
    }
}

/// One invocation of the pixel sink: `sink(mode, eventName, params[, {eventID}])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PixelCall {
    pub mode: PixelMode,
    pub event_name: String,
    pub params: Payload,
    /// Correlation identifier passed as the `eventID` call option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Ad-platform pixel. A failing call is reported, never retried.
pub trait PixelSink: Send + Sync {
    fn call(&self, call: &PixelCall) -> anyhow::Result<()>;
}

/// Tag-manager data layer: an appendable, ordered sequence of flat records.
pub trait DataLayerSink: Send + Sync {
    fn push(&self, record: Payload) -> anyhow::Result<()>;

    /// Snapshot of every record pushed so far, oldest first.
    fn entries(&self) -> Vec<Payload>;

    /// Most recent truthy value of `field`, scanning from the newest entry.
    fn latest_value(&self, field: &str) -> Option<Value> {
        self.entries()
            .into_iter()
            .rev()
            .find_map(|entry| entry.get(field).filter(|v| crate::types::is_truthy(v)).cloned())
    }
}

/// In-memory pixel sink that captures calls for testing and replay.
#[derive(Default)]
pub struct CapturePixelSink {
    calls: Mutex<Vec<PixelCall>>,
}

impl CapturePixelSink {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<PixelCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn count_named(&self, event_name: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.event_name == event_name)
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl PixelSink for CapturePixelSink {
    fn call(&self, call: &PixelCall) -> anyhow::Result<()> {
        self.calls.lock().push(call.clone());
        Ok(())
    }
}

/// Default data layer, created lazily by the host when a page has none.
#[derive(Default)]
pub struct InMemoryDataLayer {
    entries: Mutex<Vec<Payload>>,
}

impl InMemoryDataLayer {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn count_event(&self, event: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.get("event").and_then(Value::as_str) == Some(event))
            .count()
    }
}

impl DataLayerSink for InMemoryDataLayer {
    fn push(&self, record: Payload) -> anyhow::Result<()> {
        self.entries.lock().push(record);
        Ok(())
    }

    fn entries(&self) -> Vec<Payload> {
        self.entries.lock().clone()
    }
}

/// Convenience: create a capture pixel sink for tests.
pub fn capture_pixel() -> Arc<CapturePixelSink> {
    Arc::new(CapturePixelSink::new())
}

/// Convenience: create an empty in-memory data layer.
pub fn in_memory_data_layer() -> Arc<InMemoryDataLayer> {
    Arc::new(InMemoryDataLayer::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_capture_pixel() {
        let sink = capture_pixel();
        assert_eq!(sink.count(), 0);

        sink.call(&PixelCall {
            mode: PixelMode::Track,
            event_name: "Lead".into(),
            params: Payload::new(),
            event_id: Some("evt-1".into()),
        })
        .unwrap();
        sink.call(&PixelCall {
            mode: PixelMode::TrackCustom,
            event_name: "LeadlimpoStarted".into(),
            params: Payload::new(),
            event_id: None,
        })
        .unwrap();

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_named("Lead"), 1);
        assert_eq!(sink.calls()[0].event_id.as_deref(), Some("evt-1"));
        assert_eq!(sink.calls()[1].mode.as_str(), "trackCustom");
    }

    #[test]
    fn test_latest_value_scans_newest_first() {
        let layer = in_memory_data_layer();
        layer.push(record(json!({"event": "a", "event_id": "old"}))).unwrap();
        layer.push(record(json!({"event": "b", "event_id": "new"}))).unwrap();
        layer.push(record(json!({"event": "c", "event_id": ""}))).unwrap();

        assert_eq!(layer.latest_value("event_id"), Some(json!("new")));
        assert_eq!(layer.latest_value("missing"), None);
        assert_eq!(layer.count_event("b"), 1);
    }
}
