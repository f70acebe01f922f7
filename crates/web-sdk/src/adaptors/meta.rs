//! Meta pixel adaptor: dispatches funnel events to the ad platform's pixel
//! with enhanced matching, a per-page dedup window and availability polling.
//!
//! Per call: `PREPARING -> DEDUP_CHECK -> {BLOCKED | SENDING} -> {SENT | RETRY_SCHEDULED}`.
//! The dedup key is registered before the hashing suspension point, so two
//! near-simultaneous calls for the same key cannot both get through.

use std::sync::Arc;

use leadlimpo_cache::WindowCache;
use leadlimpo_core::config::PixelConfig;
use leadlimpo_core::types::{coerce_string, storage_keys, truthy_string};
use leadlimpo_core::{Clock, Payload, PixelCall, PixelMode, PixelSink};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};

use crate::debug::DebugSwitch;
use crate::hasher::SensitiveFieldHasher;
use crate::host::PageHost;

const NO_SESSION: &str = "no-session";
const NO_FLOW: &str = "no-flow";

/// A pixel event waiting to be sent. Contact fields travel in plaintext only
/// as far as the hasher.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelRequest {
    pub mode: PixelMode,
    pub event_name: String,
    pub params: Payload,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl PixelRequest {
    pub fn new(mode: PixelMode, event_name: impl Into<String>, params: Payload) -> Self {
        Self {
            mode,
            event_name: event_name.into(),
            params,
            email: None,
            phone: None,
        }
    }

    pub fn with_contact(mut self, email: Option<String>, phone: Option<String>) -> Self {
        self.email = email;
        self.phone = phone;
        self
    }
}

/// What the synchronous part of a dispatch decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOutcome {
    /// Not running in a page.
    Skipped,
    /// Development host: logged, not sent.
    DevelopmentHost,
    /// Pixel not loaded yet; another attempt is scheduled.
    RetryScheduled,
    /// Pixel never loaded within the configured number of polls.
    RetriesExhausted,
    /// Same event for the same session/flow inside the dedup window.
    Duplicate,
    /// Hashing and the sink call now run in the background.
    Dispatched,
}

/// Dedup key: `eventName_sessionId_flowId` with placeholders for missing parts.
pub fn dedup_key(event_name: &str, params: &Payload) -> String {
    let part = |field: &str, placeholder: &str| {
        params
            .get(field)
            .and_then(truthy_string)
            .unwrap_or_else(|| placeholder.to_string())
    };
    let name = if event_name.is_empty() { "event" } else { event_name };
    format!(
        "{}_{}_{}",
        name,
        part("session_id", NO_SESSION),
        part("flow_id", NO_FLOW)
    )
}

struct PreparedEvent {
    params: Payload,
    event_id: Option<String>,
}

pub struct MetaPixelDispatcher {
    host: Arc<PageHost>,
    debug: Arc<DebugSwitch>,
    hasher: SensitiveFieldHasher,
    dedup: WindowCache,
    clock: Arc<dyn Clock>,
    config: PixelConfig,
    runtime: Handle,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    retries: Mutex<Vec<AbortHandle>>,
}

impl MetaPixelDispatcher {
    pub fn new(
        host: Arc<PageHost>,
        debug: Arc<DebugSwitch>,
        clock: Arc<dyn Clock>,
        config: PixelConfig,
        dedup_window_ms: u64,
        runtime: Handle,
    ) -> Self {
        let hasher = SensitiveFieldHasher::new(host.crypto_available());
        Self {
            host,
            debug,
            hasher,
            dedup: WindowCache::new(dedup_window_ms),
            clock,
            config,
            runtime,
            in_flight: Mutex::new(Vec::new()),
            retries: Mutex::new(Vec::new()),
        }
    }

    /// Dispatch `request`. Returns as soon as the event is deduplicated and
    /// handed to a background task; sink errors never reach the caller.
    pub fn dispatch(self: &Arc<Self>, request: PixelRequest) -> PixelOutcome {
        self.attempt(request, 0)
    }

    fn attempt(self: &Arc<Self>, request: PixelRequest, attempt: u32) -> PixelOutcome {
        if !self.host.is_page() {
            return PixelOutcome::Skipped;
        }

        if !self.host.is_production() {
            dev_log!(
                self.debug,
                mode = request.mode.as_str(),
                event_name = %request.event_name,
                params = ?request.params,
                "[DEV] pixel event not sent on development host"
            );
            return PixelOutcome::DevelopmentHost;
        }

        let Some(sink) = self.host.pixel() else {
            return self.schedule_retry(request, attempt);
        };

        let key = dedup_key(&request.event_name, &request.params);
        if !self.dedup.try_register(&key, self.clock.now_ms()) {
            metrics::counter!("pixel.duplicate").increment(1);
            dev_log!(
                self.debug,
                event_name = %request.event_name,
                dedup_key = %key,
                "duplicate pixel event blocked"
            );
            return PixelOutcome::Duplicate;
        }

        let this = Arc::clone(self);
        let handle = self
            .runtime
            .spawn(async move { this.deliver(sink, request).await });
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
        drop(in_flight);
        metrics::counter!("pixel.dispatched").increment(1);
        PixelOutcome::Dispatched
    }

    fn schedule_retry(self: &Arc<Self>, request: PixelRequest, attempt: u32) -> PixelOutcome {
        if let Some(max) = self.config.max_retries {
            if attempt >= max {
                dev_log!(
                    self.debug,
                    event_name = %request.event_name,
                    attempts = attempt,
                    "pixel never loaded, event dropped"
                );
                return PixelOutcome::RetriesExhausted;
            }
        }

        dev_log!(
            self.debug,
            event_name = %request.event_name,
            attempt,
            "pixel not loaded yet, retry scheduled"
        );
        metrics::counter!("pixel.retry_scheduled").increment(1);

        let this = Arc::clone(self);
        let delay = self.config.retry_delay();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            this.attempt(request, attempt + 1);
        });

        let mut retries = self.retries.lock();
        retries.retain(|h| !h.is_finished());
        retries.push(handle.abort_handle());
        PixelOutcome::RetryScheduled
    }

    async fn deliver(&self, sink: Arc<dyn PixelSink>, request: PixelRequest) {
        let prepared = self.prepare(&request).await;
        let call = PixelCall {
            mode: request.mode,
            event_name: request.event_name,
            params: prepared.params,
            event_id: prepared.event_id,
        };

        match sink.call(&call) {
            Ok(()) => {
                dev_log!(
                    self.debug,
                    mode = call.mode.as_str(),
                    event_name = %call.event_name,
                    event_id = ?call.event_id,
                    "pixel event sent"
                );
            }
            Err(e) => {
                metrics::counter!("pixel.send_failed").increment(1);
                dev_log!(
                    self.debug,
                    event_name = %call.event_name,
                    error = ?e,
                    "pixel call failed"
                );
            }
        }
    }

    async fn prepare(&self, request: &PixelRequest) -> PreparedEvent {
        let mut params = request.params.clone();
        let event_id = self.correlation_id();

        let email = request.email.as_deref().filter(|e| !e.is_empty());
        let phone = request.phone.as_deref().filter(|p| !p.is_empty());
        let (em, ph) = tokio::join!(
            async {
                match email {
                    Some(email) => Some(self.hasher.hash_email(email).await),
                    None => None,
                }
            },
            async {
                match phone {
                    Some(phone) => Some(self.hasher.hash_phone(phone).await),
                    None => None,
                }
            }
        );

        for (field, digest) in [("em", em), ("ph", ph)] {
            match digest {
                Some(digest) if !digest.is_empty() => {
                    params.insert(field.to_string(), Value::String(digest));
                }
                Some(_) => {
                    dev_log!(
                        self.debug,
                        event_name = %request.event_name,
                        field,
                        "digest unavailable, field omitted"
                    );
                }
                None => {}
            }
        }

        PreparedEvent { params, event_id }
    }

    /// Shared event id for cross-sink dedup: session storage first, then the
    /// newest data-layer entry carrying `event_id`, cached back once found.
    pub fn correlation_id(&self) -> Option<String> {
        if !self.host.is_page() {
            return None;
        }
        let storage = self.host.session_storage();
        if let Some(id) = storage.get_non_empty(storage_keys::META_EVENT_ID) {
            return Some(id);
        }
        let id = self
            .host
            .data_layer()?
            .latest_value("event_id")
            .as_ref()
            .and_then(coerce_string)?;
        storage.set(storage_keys::META_EVENT_ID, &id);
        Some(id)
    }

    /// Wait for every dispatched send to finish. Pending retries are not
    /// awaited.
    pub async fn flush(&self) {
        loop {
            let pending = std::mem::take(&mut *self.in_flight.lock());
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                let _ = handle.await;
            }
        }
    }

    /// Sends dispatched and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Retries scheduled and not yet fired.
    pub fn pending_retries(&self) -> usize {
        self.retries.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Abort every scheduled retry. Their events are dropped.
    pub fn cancel_retries(&self) -> usize {
        let mut retries = self.retries.lock();
        let cancelled = retries.iter().filter(|h| !h.is_finished()).count();
        for handle in retries.drain(..) {
            handle.abort();
        }
        cancelled
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use leadlimpo_core::event_bus::{capture_pixel, in_memory_data_layer, CapturePixelSink};
    use leadlimpo_core::{DataLayerSink, ManualClock};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        host: Arc<PageHost>,
        clock: Arc<ManualClock>,
        dispatcher: Arc<MetaPixelDispatcher>,
    }

    fn fixture(host: PageHost, config: PixelConfig) -> Fixture {
        let host = Arc::new(host);
        let clock = Arc::new(ManualClock::new(1_000_000));
        let debug = Arc::new(DebugSwitch::new(Arc::clone(&host)));
        let dispatcher = Arc::new(MetaPixelDispatcher::new(
            Arc::clone(&host),
            debug,
            clock.clone(),
            config,
            30_000,
            Handle::current(),
        ));
        Fixture {
            host,
            clock,
            dispatcher,
        }
    }

    fn production_with(sink: &Arc<CapturePixelSink>) -> PageHost {
        PageHost::parse("https://leadlimpo.com.br/quiz")
            .unwrap()
            .with_pixel(sink.clone())
    }

    fn lead_request(session: &str) -> PixelRequest {
        let params = json!({"session_id": session, "flow_id": "quiz", "content_name": "Lead Gerado"});
        PixelRequest::new(PixelMode::Track, "Lead", params.as_object().cloned().unwrap())
    }

    #[test]
    fn test_dedup_key_placeholders() {
        let params = json!({"session_id": "s1", "flow_id": ""});
        assert_eq!(dedup_key("Lead", params.as_object().unwrap()), "Lead_s1_no-flow");
        assert_eq!(dedup_key("", &Payload::new()), "event_no-session_no-flow");
    }

    #[tokio::test]
    async fn test_dispatch_sends_once_per_window() {
        let sink = capture_pixel();
        let fx = fixture(production_with(&sink), PixelConfig::default());

        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::Dispatched);
        // Registered before the background hash runs.
        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::Duplicate);
        assert_eq!(fx.dispatcher.dispatch(lead_request("s2")), PixelOutcome::Dispatched);

        fx.clock.advance_ms(29_000);
        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::Duplicate);
        fx.clock.advance_ms(2_000);
        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::Dispatched);

        fx.dispatcher.flush().await;
        assert_eq!(sink.count_named("Lead"), 3);
    }

    #[tokio::test]
    async fn test_finished_sends_are_reaped_without_flush() {
        let sink = capture_pixel();
        let fx = fixture(production_with(&sink), PixelConfig::default());

        for i in 0..50 {
            let session = format!("s{i}");
            assert_eq!(fx.dispatcher.dispatch(lead_request(&session)), PixelOutcome::Dispatched);
            // Let the spawned send run to completion.
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(sink.count_named("Lead"), 50);
        assert!(fx.dispatcher.in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_enhanced_matching_fields() {
        let sink = capture_pixel();
        let fx = fixture(production_with(&sink), PixelConfig::default());

        let request = lead_request("s1").with_contact(
            Some(" Ana@Example.com".into()),
            Some("(11) 91234-5678".into()),
        );
        fx.dispatcher.dispatch(request);
        fx.dispatcher.flush().await;

        let call = &sink.calls()[0];
        let hasher = SensitiveFieldHasher::new(true);
        assert_eq!(call.params["em"], hasher.hash_email("ana@example.com").await);
        assert_eq!(call.params["ph"], hasher.hash_phone("11912345678").await);
        assert!(!call.params.values().any(|v| v == "(11) 91234-5678"));
    }

    #[tokio::test]
    async fn test_missing_digest_primitive_omits_fields() {
        let sink = capture_pixel();
        let fx = fixture(production_with(&sink).without_crypto(), PixelConfig::default());

        fx.dispatcher
            .dispatch(lead_request("s1").with_contact(Some("a@b.com".into()), None));
        fx.dispatcher.flush().await;

        let call = &sink.calls()[0];
        assert!(call.params.get("em").is_none());
        assert!(call.params.get("ph").is_none());
    }

    #[tokio::test]
    async fn test_correlation_id_from_data_layer() {
        let sink = capture_pixel();
        let layer = in_memory_data_layer();
        layer
            .push(json!({"event": "gtm.js", "event_id": 777}).as_object().cloned().unwrap())
            .unwrap();
        let fx = fixture(
            production_with(&sink).with_data_layer(layer.clone()),
            PixelConfig::default(),
        );

        fx.dispatcher.dispatch(lead_request("s1"));
        fx.dispatcher.flush().await;

        assert_eq!(sink.calls()[0].event_id.as_deref(), Some("777"));
        assert_eq!(
            fx.host
                .session_storage()
                .get(storage_keys::META_EVENT_ID)
                .as_deref(),
            Some("777")
        );
    }

    #[tokio::test]
    async fn test_development_host_short_circuits() {
        let sink = capture_pixel();
        let host = PageHost::parse("http://localhost:3000/").unwrap().with_pixel(sink.clone());
        let fx = fixture(host, PixelConfig::default());

        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::DevelopmentHost);
        fx.dispatcher.flush().await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_detached_host_is_skipped() {
        let fx = fixture(PageHost::detached(), PixelConfig::default());
        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::Skipped);
        assert_eq!(fx.dispatcher.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_pixel_loads() {
        let fx = fixture(
            PageHost::parse("https://leadlimpo.com.br/").unwrap(),
            PixelConfig::default(),
        );

        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::RetryScheduled);
        assert_eq!(fx.dispatcher.pending_retries(), 1);

        // Still missing after the first poll: polled again.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(fx.dispatcher.pending_retries(), 1);

        let sink = capture_pixel();
        fx.host.install_pixel(sink.clone());
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        fx.dispatcher.flush().await;

        assert_eq!(sink.count_named("Lead"), 1);
        assert_eq!(fx.dispatcher.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retries_give_up() {
        let config = PixelConfig {
            retry_delay_ms: 1_000,
            max_retries: Some(2),
        };
        let fx = fixture(PageHost::parse("https://leadlimpo.com.br/").unwrap(), config);

        fx.dispatcher.dispatch(lead_request("s1"));
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(fx.dispatcher.pending_retries(), 0);

        let sink = capture_pixel();
        fx.host.install_pixel(sink.clone());
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        fx.dispatcher.flush().await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_retry_never_fires() {
        let fx = fixture(
            PageHost::parse("https://leadlimpo.com.br/").unwrap(),
            PixelConfig::default(),
        );

        fx.dispatcher.dispatch(lead_request("s1"));
        assert_eq!(fx.dispatcher.cancel_retries(), 1);

        let sink = capture_pixel();
        fx.host.install_pixel(sink.clone());
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        fx.dispatcher.flush().await;
        assert_eq!(sink.count(), 0);
        assert_eq!(fx.dispatcher.pending_retries(), 0);
    }

    struct FailingPixel;

    impl PixelSink for FailingPixel {
        fn call(&self, _call: &PixelCall) -> anyhow::Result<()> {
            anyhow::bail!("fbq threw")
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_contained() {
        let host = PageHost::parse("https://leadlimpo.com.br/")
            .unwrap()
            .with_pixel(Arc::new(FailingPixel));
        let fx = fixture(host, PixelConfig::default());

        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::Dispatched);
        fx.dispatcher.flush().await;
        // The failed send still counts against the window.
        assert_eq!(fx.dispatcher.dispatch(lead_request("s1")), PixelOutcome::Duplicate);
    }
}
