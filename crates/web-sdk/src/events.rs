//! Funnel event vocabulary and the inputs accepted by each funnel operation.

use leadlimpo_core::types::{coerce_string, truthy_string};
use leadlimpo_core::{Payload, PixelMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONTENT_CATEGORY: &str = "Lead Generation";
pub const CUSTOM_PIXEL_EVENT: &str = "LeadlimpoCustom";
pub const CUSTOM_DATA_LAYER_EVENT: &str = "leadlimpo_custom";

/// The five lifecycle events of the lead-generation flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FunnelEvent {
    ViewContent,
    Started,
    StepAnswered,
    Lead,
    CompleteRegistration,
}

impl FunnelEvent {
    /// Pixel event name. Standard names map to `track`, the rest are custom.
    pub fn pixel_event(&self) -> &'static str {
        match self {
            FunnelEvent::ViewContent => "ViewContent",
            FunnelEvent::Started => "LeadlimpoStarted",
            FunnelEvent::StepAnswered => "LeadlimpoStepAnswered",
            FunnelEvent::Lead => "Lead",
            FunnelEvent::CompleteRegistration => "CompleteRegistration",
        }
    }

    pub fn pixel_mode(&self) -> PixelMode {
        match self {
            FunnelEvent::Started | FunnelEvent::StepAnswered => PixelMode::TrackCustom,
            FunnelEvent::ViewContent | FunnelEvent::Lead | FunnelEvent::CompleteRegistration => {
                PixelMode::Track
            }
        }
    }

    /// `event` field of the data-layer record.
    pub fn data_layer_event(&self) -> &'static str {
        match self {
            FunnelEvent::ViewContent => "leadlimpo_viewcontent",
            FunnelEvent::Started => "leadlimpo_started",
            FunnelEvent::StepAnswered => "leadlimpo_step_answered",
            FunnelEvent::Lead => "leadlimpo_lead",
            FunnelEvent::CompleteRegistration => "leadlimpo_complete_registration",
        }
    }

    /// `content_name` sent to the pixel, for the events that carry one.
    pub fn content_name(&self) -> Option<&'static str> {
        match self {
            FunnelEvent::ViewContent => Some("Leadlimpo ViewContent"),
            FunnelEvent::Lead => Some("Lead Gerado"),
            FunnelEvent::CompleteRegistration => Some("Leadlimpo Complete Registration"),
            FunnelEvent::Started | FunnelEvent::StepAnswered => None,
        }
    }
}

/// Input of `track_started`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartedInput {
    pub step_id: Option<String>,
}

impl StartedInput {
    pub fn at(step_id: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.into()),
        }
    }

    pub fn from_value(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::default();
        };
        Self {
            step_id: obj.get("stepId").and_then(coerce_string),
        }
    }
}

/// Input of `track_step_answered`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepAnswer {
    pub step_id: Option<String>,
    pub answer: Option<Value>,
    pub meta: Payload,
}

impl StepAnswer {
    pub fn from_value(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::default();
        };
        Self {
            step_id: obj.get("stepId").and_then(coerce_string),
            answer: obj.get("answer").cloned(),
            meta: meta_of(obj),
        }
    }
}

/// Input of `track_lead`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadInput {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub meta: Payload,
}

impl LeadInput {
    /// Non-numeric `value`s are dropped; scalar contact fields become strings.
    pub fn from_value(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::default();
        };
        Self {
            phone: obj.get("phone").and_then(coerce_string),
            email: obj.get("email").and_then(coerce_string),
            value: obj.get("value").filter(|v| v.is_number()).and_then(Value::as_f64),
            currency: obj.get("currency").and_then(truthy_string),
            meta: meta_of(obj),
        }
    }
}

/// Input of `track_complete_registration`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationInput {
    /// Defaults to `true` when absent.
    pub status: Option<bool>,
    pub meta: Payload,
}

impl RegistrationInput {
    pub fn from_value(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::default();
        };
        Self {
            status: obj.get("status").and_then(Value::as_bool),
            meta: meta_of(obj),
        }
    }
}

fn meta_of(obj: &Payload) -> Payload {
    obj.get("meta")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}
