//! Google Tag Manager adaptor: pushes funnel records into the page's
//! `dataLayer`, with an optional persisted dedup window for records that must
//! not repeat across reloads (the lead).

use std::sync::Arc;

use leadlimpo_cache::PersistedWindowCache;
use leadlimpo_core::config::DedupConfig;
use leadlimpo_core::types::storage_keys;
use leadlimpo_core::{Clock, Payload};

use crate::debug::DebugSwitch;
use crate::host::PageHost;

/// Result of a data-layer push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    NotInPage,
    Duplicate,
    Pushed,
    /// The data layer rejected the record; logged and swallowed.
    Failed,
}

pub struct GtmDispatcher {
    host: Arc<PageHost>,
    debug: Arc<DebugSwitch>,
    clock: Arc<dyn Clock>,
    sent: PersistedWindowCache,
}

impl GtmDispatcher {
    pub fn new(host: Arc<PageHost>, debug: Arc<DebugSwitch>, clock: Arc<dyn Clock>, dedup: &DedupConfig) -> Self {
        let sent = PersistedWindowCache::new(
            host.persistent_storage().clone(),
            storage_keys::GTM_EVENT_CACHE,
            dedup.data_layer_window_ms,
            dedup.data_layer_retention_ms,
        );
        Self {
            host,
            debug,
            clock,
            sent,
        }
    }

    /// Append `record`, creating the data layer if the page has none.
    pub fn push(&self, record: Payload) -> PushOutcome {
        let Some(layer) = self.host.ensure_data_layer() else {
            return PushOutcome::NotInPage;
        };

        let event = record.get("event").cloned();
        match layer.push(record) {
            Ok(()) => {
                metrics::counter!("data_layer.pushed").increment(1);
                dev_log!(self.debug, event = ?event, "data layer push");
                PushOutcome::Pushed
            }
            Err(e) => {
                metrics::counter!("data_layer.push_failed").increment(1);
                dev_log!(self.debug, event = ?event, error = ?e, "data layer push failed");
                PushOutcome::Failed
            }
        }
    }

    /// Push `record` unless `dedup_id` was pushed within the window. The id is
    /// registered before the push.
    pub fn push_once(&self, dedup_id: &str, record: Payload) -> PushOutcome {
        if !self.host.is_page() {
            return PushOutcome::NotInPage;
        }
        if !self.sent.try_register(dedup_id, self.clock.now_ms()) {
            metrics::counter!("data_layer.duplicate").increment(1);
            dev_log!(self.debug, dedup_id, "duplicate data layer event blocked");
            return PushOutcome::Duplicate;
        }
        self.push(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use leadlimpo_core::event_bus::in_memory_data_layer;
    use leadlimpo_core::{DataLayerSink, ManualClock};
    use serde_json::json;

    fn record(event: &str) -> Payload {
        json!({"event": event, "session_id": "s1"}).as_object().cloned().unwrap()
    }

    fn dispatcher(host: PageHost, clock: Arc<ManualClock>) -> (Arc<PageHost>, GtmDispatcher) {
        let host = Arc::new(host);
        let debug = Arc::new(DebugSwitch::new(Arc::clone(&host)));
        let gtm = GtmDispatcher::new(Arc::clone(&host), debug, clock, &DedupConfig::default());
        (host, gtm)
    }

    #[test]
    fn test_push_creates_data_layer() {
        let (host, gtm) = dispatcher(
            PageHost::parse("https://leadlimpo.com.br/").unwrap(),
            Arc::new(ManualClock::new(0)),
        );
        assert!(host.data_layer().is_none());

        assert_eq!(gtm.push(record("leadlimpo_started")), PushOutcome::Pushed);
        let entries = host.data_layer().unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["event"], "leadlimpo_started");
    }

    #[test]
    fn test_push_once_window() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let layer = in_memory_data_layer();
        let (host, gtm) = dispatcher(
            PageHost::parse("https://leadlimpo.com.br/").unwrap().with_data_layer(layer.clone()),
            clock.clone(),
        );

        let id = "leadlimpo_lead_s1_quiz";
        assert_eq!(gtm.push_once(id, record("leadlimpo_lead")), PushOutcome::Pushed);
        clock.advance_ms(4_000);
        assert_eq!(gtm.push_once(id, record("leadlimpo_lead")), PushOutcome::Duplicate);
        clock.advance_ms(2_000);
        assert_eq!(gtm.push_once(id, record("leadlimpo_lead")), PushOutcome::Pushed);
        assert_eq!(layer.count_event("leadlimpo_lead"), 2);

        // Survives in persistent storage under the cache key.
        let stored = host
            .persistent_storage()
            .get(storage_keys::GTM_EVENT_CACHE)
            .unwrap();
        assert!(stored.contains(id));
    }

    #[test]
    fn test_window_shared_across_dispatchers() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let host = Arc::new(PageHost::parse("https://leadlimpo.com.br/").unwrap());
        let debug = Arc::new(DebugSwitch::new(Arc::clone(&host)));
        let first = GtmDispatcher::new(Arc::clone(&host), Arc::clone(&debug), clock.clone(), &DedupConfig::default());
        let reloaded = GtmDispatcher::new(Arc::clone(&host), debug, clock.clone(), &DedupConfig::default());

        assert_eq!(first.push_once("lead_a", record("leadlimpo_lead")), PushOutcome::Pushed);
        clock.advance_ms(1_000);
        assert_eq!(reloaded.push_once("lead_a", record("leadlimpo_lead")), PushOutcome::Duplicate);
    }

    struct RejectingLayer;

    impl DataLayerSink for RejectingLayer {
        fn push(&self, _record: Payload) -> anyhow::Result<()> {
            anyhow::bail!("dataLayer is frozen")
        }

        fn entries(&self) -> Vec<Payload> {
            Vec::new()
        }
    }

    #[test]
    fn test_failing_layer_is_contained() {
        let (_, gtm) = dispatcher(
            PageHost::parse("https://leadlimpo.com.br/")
                .unwrap()
                .with_data_layer(Arc::new(RejectingLayer)),
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(gtm.push(record("leadlimpo_custom")), PushOutcome::Failed);
    }

    #[test]
    fn test_detached_host() {
        let (_, gtm) = dispatcher(PageHost::detached(), Arc::new(ManualClock::new(0)));
        assert_eq!(gtm.push(record("x")), PushOutcome::NotInPage);
        assert_eq!(gtm.push_once("x", record("x")), PushOutcome::NotInPage);
    }
}
