//! The five funnel operations. Each builds the context payload, sends a
//! curated subset to the pixel and the full record to the data layer. The two
//! dispatches are independent: neither waits for nor depends on the other.

use leadlimpo_core::types::is_truthy;
use leadlimpo_core::{ContactRecord, ContextPatch, Payload};
use serde_json::Value;

use crate::adaptors::gtm::PushOutcome;
use crate::adaptors::meta::{PixelOutcome, PixelRequest};
use crate::attribution::CAMPAIGN_KEYS;
use crate::events::{
    FunnelEvent, LeadInput, RegistrationInput, StartedInput, StepAnswer, CONTENT_CATEGORY,
};
use crate::tracker::LeadTracker;

/// What each sink decided for one funnel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunnelDispatch {
    pub pixel: PixelOutcome,
    pub data_layer: PushOutcome,
}

/// Copy `fields` from `source` when present.
fn pick(source: &Payload, fields: &[&str]) -> Payload {
    let mut out = Payload::new();
    for field in fields {
        if let Some(value) = source.get(*field) {
            out.insert((*field).to_string(), value.clone());
        }
    }
    out
}

fn overlay(target: &mut Payload, extra: &Payload) {
    for (key, value) in extra {
        target.insert(key.clone(), value.clone());
    }
}

fn with_campaign(base: &Payload, fields: &[&str]) -> Payload {
    let mut out = pick(base, fields);
    overlay(&mut out, &pick(base, &CAMPAIGN_KEYS));
    out
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

impl LeadTracker {
    fn stamp(&self, record: &mut Payload, event: FunnelEvent) {
        record.insert("event".into(), Value::from(event.data_layer_event()));
        record.insert("timestamp".into(), Value::from(self.clock.now_ms()));
    }

    fn pixel_request(&self, event: FunnelEvent, mut params: Payload) -> PixelRequest {
        if let Some(name) = event.content_name() {
            params.insert("content_name".into(), Value::from(name));
        }
        PixelRequest::new(event.pixel_mode(), event.pixel_event(), params)
    }

    /// Landing view. `extra` is overlaid on the data-layer record.
    pub fn track_view_content(&self, extra: Option<&Payload>) -> FunnelDispatch {
        let event = FunnelEvent::ViewContent;
        let base = self.context.base_payload(extra);

        let mut params = with_campaign(&base, &["session_id", "flow_id"]);
        params.insert("content_category".into(), Value::from(CONTENT_CATEGORY));
        let pixel = self.pixel.dispatch(self.pixel_request(event, params));

        let mut record = base;
        self.stamp(&mut record, event);
        FunnelDispatch {
            pixel,
            data_layer: self.data_layer.push(record),
        }
    }

    /// Funnel start. A supplied step id becomes the current step.
    pub fn track_started(&self, input: &StartedInput) -> FunnelDispatch {
        let event = FunnelEvent::Started;
        if let Some(step) = &input.step_id {
            self.context.apply(&ContextPatch::step(step.clone()));
        }
        let base = self.context.base_payload(None);

        let params = with_campaign(&base, &["session_id", "flow_id", "step_id"]);
        let pixel = self.pixel.dispatch(self.pixel_request(event, params));

        let mut record = base;
        self.stamp(&mut record, event);
        FunnelDispatch {
            pixel,
            data_layer: self.data_layer.push(record),
        }
    }

    pub fn track_step_answered(&self, input: &StepAnswer) -> FunnelDispatch {
        let event = FunnelEvent::StepAnswered;
        if let Some(step) = &input.step_id {
            self.context.apply(&ContextPatch::step(step.clone()));
        }

        let mut extra = Payload::new();
        if let Some(step) = self.context.current().step_id {
            extra.insert("step_id".into(), Value::String(step));
        }
        if let Some(answer) = &input.answer {
            extra.insert("answer".into(), answer.clone());
        }
        let mut base = self.context.base_payload(Some(&extra));
        overlay(&mut base, &input.meta);

        let params = with_campaign(&base, &["session_id", "flow_id", "step_id", "answer"]);
        let pixel = self.pixel.dispatch(self.pixel_request(event, params));

        let mut record = base;
        self.stamp(&mut record, event);
        FunnelDispatch {
            pixel,
            data_layer: self.data_layer.push(record),
        }
    }

    /// Lead capture. Supplied contact fields are saved first; missing ones are
    /// backfilled from earlier in the session. The data-layer record is
    /// deduplicated per session and flow.
    pub fn track_lead(&self, input: &LeadInput) -> FunnelDispatch {
        let event = FunnelEvent::Lead;
        self.context.save_contact(&ContactRecord {
            phone: non_empty(&input.phone),
            email: non_empty(&input.email),
        });

        let stored = self.context.stored_contact();
        let phone = non_empty(&input.phone).or(stored.phone);
        let email = non_empty(&input.email).or(stored.email);
        let value = input.value;
        let currency = non_empty(&input.currency)
            .or_else(|| value.map(|_| self.config.funnel.default_currency.clone()));

        let base = self.context.base_payload(None);

        let mut params = Payload::new();
        params.insert("content_category".into(), Value::from(CONTENT_CATEGORY));
        if let Some(value) = value {
            params.insert("value".into(), Value::from(value));
        }
        if let Some(currency) = &currency {
            params.insert("currency".into(), Value::from(currency.as_str()));
        }
        overlay(&mut params, &with_campaign(&base, &["session_id", "flow_id"]));
        let request = self
            .pixel_request(event, params)
            .with_contact(email.clone(), phone.clone());
        let pixel = self.pixel.dispatch(request);

        let dedup_id = lead_dedup_id(&base);

        let mut contact = Payload::new();
        if let Some(phone) = phone {
            contact.insert("phone".into(), Value::String(phone));
        }
        if let Some(email) = email {
            contact.insert("email".into(), Value::String(email));
        }
        let mut record = self.context.base_payload(Some(&contact));
        overlay(&mut record, &input.meta);
        if let Some(value) = value {
            record.insert("value".into(), Value::from(value));
        }
        if let Some(currency) = currency {
            record.insert("currency".into(), Value::String(currency));
        }
        self.stamp(&mut record, event);

        FunnelDispatch {
            pixel,
            data_layer: self.data_layer.push_once(&dedup_id, record),
        }
    }

    /// Registration complete. `status` defaults to `true`.
    pub fn track_complete_registration(&self, input: &RegistrationInput) -> FunnelDispatch {
        let event = FunnelEvent::CompleteRegistration;
        let status = input.status.unwrap_or(true);
        let base = self.context.base_payload(None);

        let mut params = Payload::new();
        params.insert("status".into(), Value::Bool(status));
        overlay(&mut params, &with_campaign(&base, &["session_id", "flow_id"]));
        let pixel = self.pixel.dispatch(self.pixel_request(event, params));

        let mut status_field = Payload::new();
        status_field.insert("status".into(), Value::Bool(status));
        let mut record = self.context.base_payload(Some(&status_field));
        overlay(&mut record, &input.meta);
        self.stamp(&mut record, event);

        FunnelDispatch {
            pixel,
            data_layer: self.data_layer.push(record),
        }
    }
}

/// `leadlimpo_lead_<session>_<flow>` with placeholders for missing parts.
pub fn lead_dedup_id(base: &Payload) -> String {
    let part = |field: &str, placeholder: &str| match base.get(field) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(v) if is_truthy(v) => v.to_string(),
        _ => placeholder.to_string(),
    };
    format!(
        "leadlimpo_lead_{}_{}",
        part("session_id", "no-session"),
        part("flow_id", "no-flow")
    )
}
