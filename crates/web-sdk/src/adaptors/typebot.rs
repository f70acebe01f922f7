//! Typebot adaptor: best-effort recognition of a hosted Typebot widget's
//! `postMessage` traffic.

use leadlimpo_core::types::truthy_string;
use serde_json::Value;

use super::{ChatAdaptor, FunnelSignal};

const START_TYPES: [&str; 2] = ["typebot_started", "typebot.start"];
const ANSWER_TYPES: [&str; 3] = ["typebot_answer", "typebot.message", "typebot_block_answered"];
const END_TYPES: [&str; 3] = ["typebot_completed", "typebot.end", "typebot_finished"];
const CONTACT_STEP_HINTS: [&str; 3] = ["whatsapp", "contato", "telefone"];

/// Step id used when the widget starts a conversation.
pub const START_STEP: &str = "inicio";
const UNKNOWN_STEP: &str = "unknown_step";

#[derive(Debug, Default, Clone, Copy)]
pub struct TypebotAdaptor;

impl TypebotAdaptor {
    pub fn new() -> Self {
        Self
    }

    fn is_from_typebot(data: &serde_json::Map<String, Value>) -> bool {
        let equals_typebot = |field: &str| data.get(field).and_then(Value::as_str) == Some("typebot");
        let starts_with_typebot = |field: &str| {
            data.get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.to_lowercase().starts_with("typebot"))
        };
        equals_typebot("source")
            || equals_typebot("from")
            || starts_with_typebot("type")
            || starts_with_typebot("event")
    }

    fn first_truthy(data: &serde_json::Map<String, Value>, fields: &[&str]) -> Option<Value> {
        fields
            .iter()
            .filter_map(|f| data.get(*f))
            .find(|v| leadlimpo_core::types::is_truthy(v))
            .cloned()
    }
}

impl ChatAdaptor for TypebotAdaptor {
    fn platform(&self) -> &str {
        "typebot"
    }

    fn parse_inbound_message(&self, raw: &Value) -> Option<FunnelSignal> {
        // String payloads may carry JSON.
        let parsed;
        let data = match raw {
            Value::String(s) => {
                parsed = serde_json::from_str::<Value>(s).ok()?;
                parsed.as_object()?
            }
            other => other.as_object()?,
        };

        if !Self::is_from_typebot(data) {
            return None;
        }

        let event_type = data
            .get("type")
            .and_then(truthy_string)
            .or_else(|| data.get("event").and_then(truthy_string))
            .unwrap_or_default()
            .to_lowercase();

        if START_TYPES.contains(&event_type.as_str()) {
            return Some(FunnelSignal::Started {
                step_id: START_STEP.to_string(),
            });
        }

        if ANSWER_TYPES.contains(&event_type.as_str()) {
            let step_id = Self::first_truthy(data, &["blockId", "stepId", "block_id", "questionId"])
                .as_ref()
                .and_then(truthy_string)
                .unwrap_or_else(|| UNKNOWN_STEP.to_string());
            let answer = Self::first_truthy(data, &["answer", "message", "value"]).or_else(|| {
                data.get("payload")
                    .and_then(|p| p.get("answer"))
                    .filter(|v| leadlimpo_core::types::is_truthy(v))
                    .cloned()
            });
            let lowered = step_id.to_lowercase();
            let captures_contact = CONTACT_STEP_HINTS.iter().any(|hint| lowered.contains(hint));
            return Some(FunnelSignal::StepAnswered {
                step_id,
                answer,
                captures_contact,
            });
        }

        if END_TYPES.contains(&event_type.as_str()) {
            return Some(FunnelSignal::Completed);
        }

        None
    }
}
