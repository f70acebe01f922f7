//! Lead tracker: one instance per page load. Owns the context, the debug
//! switch and both dispatch pipelines; the funnel operations live in
//! [`crate::funnel`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use leadlimpo_core::{
    Attribution, Clock, ContactRecord, ContextPatch, ContextSnapshot, Payload, PixelMode, SystemClock,
    TrackError, TrackResult, TrackerConfig,
};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;

use crate::adaptors::gtm::{GtmDispatcher, PushOutcome};
use crate::adaptors::meta::{MetaPixelDispatcher, PixelOutcome, PixelRequest};
use crate::adaptors::typebot::{TypebotAdaptor, START_STEP};
use crate::adaptors::{ChatAdaptor, FunnelSignal};
use crate::attribution;
use crate::context::ContextManager;
use crate::debug::{attribute_enables, DebugSwitch};
use crate::events::{
    LeadInput, RegistrationInput, StartedInput, StepAnswer, CUSTOM_DATA_LAYER_EVENT, CUSTOM_PIXEL_EVENT,
};
use crate::host::PageHost;

pub struct TrackerBuilder {
    host: Arc<PageHost>,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    chat_adaptor: Box<dyn ChatAdaptor>,
}

impl TrackerBuilder {
    pub fn new(host: Arc<PageHost>) -> Self {
        Self {
            host,
            config: TrackerConfig::default(),
            clock: Arc::new(SystemClock),
            chat_adaptor: Box::new(TypebotAdaptor::new()),
        }
    }

    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn chat_adaptor(mut self, adaptor: Box<dyn ChatAdaptor>) -> Self {
        self.chat_adaptor = adaptor;
        self
    }

    /// Build the tracker. Retries and sends are spawned on the current tokio
    /// runtime, so this must be called from within one.
    pub fn build(self) -> TrackResult<LeadTracker> {
        let runtime = Handle::try_current()
            .map_err(|e| TrackError::Runtime(format!("lead tracker needs a tokio runtime: {e}")))?;

        let debug = Arc::new(DebugSwitch::new(Arc::clone(&self.host)));
        let pixel = Arc::new(MetaPixelDispatcher::new(
            Arc::clone(&self.host),
            Arc::clone(&debug),
            Arc::clone(&self.clock),
            self.config.pixel.clone(),
            self.config.dedup.pixel_window_ms,
            runtime,
        ));
        let data_layer = GtmDispatcher::new(
            Arc::clone(&self.host),
            Arc::clone(&debug),
            Arc::clone(&self.clock),
            &self.config.dedup,
        );

        Ok(LeadTracker {
            context: ContextManager::new(Arc::clone(&self.host)),
            host: self.host,
            config: self.config,
            clock: self.clock,
            debug,
            pixel,
            data_layer,
            chat: self.chat_adaptor,
            bridge_wired: AtomicBool::new(false),
        })
    }
}

pub struct LeadTracker {
    pub(crate) host: Arc<PageHost>,
    pub(crate) config: TrackerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) debug: Arc<DebugSwitch>,
    pub(crate) context: ContextManager,
    pub(crate) pixel: Arc<MetaPixelDispatcher>,
    pub(crate) data_layer: GtmDispatcher,
    chat: Box<dyn ChatAdaptor>,
    bridge_wired: AtomicBool,
}

impl LeadTracker {
    pub fn builder(host: Arc<PageHost>) -> TrackerBuilder {
        TrackerBuilder::new(host)
    }

    /// Tracker with default configuration and the system clock.
    pub fn new(host: Arc<PageHost>) -> TrackResult<Self> {
        TrackerBuilder::new(host).build()
    }

    /// Page-load bootstrap: debug attribute, context restore, flow from the
    /// path, URL attribution snapshot, chat bridge.
    pub fn init(&self) {
        if !self.host.is_page() {
            return;
        }

        if self.host.debug_attribute().is_some_and(attribute_enables) {
            self.debug.set(true);
        }

        self.context.restore();
        self.context.ensure_flow_from_path(&self.config.funnel.default_flow);

        let from_url = attribution::from_url(&self.host);
        if !from_url.is_empty() {
            attribution::save(self.host.session_storage(), &from_url);
        }

        if !self.bridge_wired.swap(true, Ordering::SeqCst) {
            debug!(platform = self.chat.platform(), "chat bridge wired");
        }

        let ctx = self.context.current();
        dev_log!(
            self.debug,
            session_id = ?ctx.session_id,
            flow_id = ?ctx.flow_id,
            step_id = ?ctx.step_id,
            "lead tracker initialized"
        );
    }

    pub fn set_context(&self, patch: &ContextPatch) {
        self.context.apply(patch);
    }

    /// Accepts `{sessionId?, flowId?, stepId?}`; anything else is ignored.
    pub fn set_context_value(&self, raw: &Value) {
        self.context.apply_value(raw);
    }

    pub fn get_context(&self) -> ContextSnapshot {
        self.context.snapshot()
    }

    pub fn get_attribution(&self) -> Attribution {
        attribution::combined(&self.host)
    }

    pub fn save_contact(&self, contact: &ContactRecord) {
        self.context.save_contact(contact);
    }

    pub fn save_contact_value(&self, raw: &Value) {
        if let Some(contact) = ContactRecord::from_value(raw) {
            self.context.save_contact(&contact);
        }
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug.set(enabled);
        dev_log!(self.debug, enabled, "debug mode changed");
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.enabled()
    }

    /// Context payload overlaid with `params`, sent as a custom pixel event.
    pub fn track_custom_pixel_event(&self, event_name: &str, params: &Payload) -> PixelOutcome {
        let name = if event_name.is_empty() {
            CUSTOM_PIXEL_EVENT
        } else {
            event_name
        };
        let payload = self.context.base_payload(Some(params));
        self.pixel
            .dispatch(PixelRequest::new(PixelMode::TrackCustom, name, payload))
    }

    /// Context payload overlaid with `record`. `event` and `timestamp` are
    /// filled in only when the record leaves them falsy.
    pub fn push_custom_data_layer_event(&self, record: &Payload) -> PushOutcome {
        let mut payload = self.context.base_payload(Some(record));
        if !payload.get("event").is_some_and(leadlimpo_core::types::is_truthy) {
            payload.insert("event".into(), Value::from(CUSTOM_DATA_LAYER_EVENT));
        }
        if !payload.get("timestamp").is_some_and(leadlimpo_core::types::is_truthy) {
            payload.insert("timestamp".into(), Value::from(self.clock.now_ms()));
        }
        self.data_layer.push(payload)
    }

    /// Feed one inbound chat-widget message through the bridge. Ignored until
    /// [`init`](Self::init) has wired it.
    pub fn receive_message(&self, raw: &Value) -> Option<FunnelSignal> {
        if !self.bridge_wired.load(Ordering::SeqCst) {
            return None;
        }
        let signal = self.chat.parse_inbound_message(raw)?;
        dev_log!(self.debug, platform = self.chat.platform(), signal = ?signal, "chat message");

        match &signal {
            FunnelSignal::Started { step_id } => {
                let step = if step_id.is_empty() { START_STEP } else { step_id.as_str() };
                self.track_started(&StartedInput::at(step));
            }
            FunnelSignal::StepAnswered {
                step_id,
                answer,
                captures_contact,
            } => {
                self.track_step_answered(&StepAnswer {
                    step_id: Some(step_id.clone()),
                    answer: answer.clone(),
                    meta: Payload::new(),
                });
                let phone = answer.as_ref().and_then(leadlimpo_core::types::truthy_string);
                if let (true, Some(phone)) = (*captures_contact, phone) {
                    self.save_contact(&ContactRecord {
                        phone: Some(phone),
                        email: None,
                    });
                    self.track_lead(&LeadInput::default());
                }
            }
            FunnelSignal::Completed => {
                self.track_complete_registration(&RegistrationInput {
                    status: Some(true),
                    meta: Payload::new(),
                });
            }
        }
        Some(signal)
    }

    /// Wait for in-flight pixel sends.
    pub async fn flush(&self) {
        self.pixel.flush().await;
    }

    pub fn pending_retries(&self) -> usize {
        self.pixel.pending_retries()
    }

    pub fn cancel_retries(&self) -> usize {
        self.pixel.cancel_retries()
    }

    pub fn host(&self) -> &Arc<PageHost> {
        &self.host
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}
