use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat record sent to either sink. Keys are part of the public contract read
/// by the pixel and the tag manager.
pub type Payload = serde_json::Map<String, Value>;

/// Storage keys shared with pages that already run the tracker.
pub mod storage_keys {
    pub const UTMS: &str = "utm_params";
    pub const SESSION_ID: &str = "leadlimpo_session_id";
    pub const FLOW_ID: &str = "leadlimpo_flow_id";
    pub const STEP_ID: &str = "leadlimpo_step_id";
    pub const PHONE: &str = "leadlimpo_phone";
    pub const EMAIL: &str = "leadlimpo_email";
    pub const META_EVENT_ID: &str = "leadlimpo_event_id";
    pub const GTM_EVENT_CACHE: &str = "leadlimpo_event_cache";
}

/// Session/flow/step identifiers for the current browsing session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub flow_id: Option<String>,
    pub step_id: Option<String>,
}

/// Partial update for [`SessionContext`]. Absent fields leave the current
/// value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextPatch {
    pub session_id: Option<String>,
    pub flow_id: Option<String>,
    pub step_id: Option<String>,
}

impl ContextPatch {
    /// Build a patch from a loosely typed record. Non-null scalars are coerced
    /// to strings; a non-object value yields `None`.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            session_id: obj.get("sessionId").and_then(coerce_string),
            flow_id: obj.get("flowId").and_then(coerce_string),
            step_id: obj.get("stepId").and_then(coerce_string),
        })
    }

    pub fn session(id: impl Into<String>) -> Self {
        Self {
            session_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn flow(id: impl Into<String>) -> Self {
        Self {
            flow_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn step(id: impl Into<String>) -> Self {
        Self {
            step_id: Some(id.into()),
            ..Default::default()
        }
    }
}

/// Snapshot returned by `getContext`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub session_id: Option<String>,
    pub flow_id: Option<String>,
    pub step_id: Option<String>,
    pub utms: Attribution,
}

/// Campaign-attribution parameters (`utm_*`). Never holds empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attribution(BTreeMap<String, String>);

impl Attribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert a value; empty values are ignored.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.0.insert(key.into(), value);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Overlay `other` onto `self`. Only non-empty values overwrite, so a
    /// present parameter is never downgraded to empty.
    pub fn overlay(&mut self, other: &Attribution) {
        for (key, value) in &other.0 {
            if !value.is_empty() {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn prune_empty(&mut self) {
        self.0.retain(|_, value| !value.is_empty());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attribution {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attribution = Attribution::new();
        for (key, value) in iter {
            attribution.insert(key, value);
        }
        attribution
    }
}

/// Contact fields captured during the funnel, kept to backfill later leads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ContactRecord {
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            phone: obj.get("phone").and_then(coerce_string),
            email: obj.get("email").and_then(coerce_string),
        })
    }
}

/// JavaScript-style truthiness, used wherever page-supplied values decide
/// whether a field counts as present.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value as a plain string: strings verbatim, everything else through
/// its JSON form. `null` yields `None`.
pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Like [`coerce_string`] but also drops falsy values.
pub fn truthy_string(value: &Value) -> Option<String> {
    if is_truthy(value) {
        coerce_string(value)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribution_overlay_is_monotonic() {
        let mut stored: Attribution = [("utm_source", "ig"), ("utm_medium", "cpc")]
            .into_iter()
            .collect();

        let blank: Attribution = [("utm_source", "")].into_iter().collect();
        stored.overlay(&blank);
        assert_eq!(stored.get("utm_source"), Some("ig"));

        let newer: Attribution = [("utm_source", "fb")].into_iter().collect();
        stored.overlay(&newer);
        assert_eq!(stored.get("utm_source"), Some("fb"));
        assert_eq!(stored.get("utm_medium"), Some("cpc"));
    }

    #[test]
    fn test_attribution_serializes_as_flat_map() {
        let attribution: Attribution = [("utm_campaign", "promo")].into_iter().collect();
        let json = serde_json::to_value(&attribution).unwrap();
        assert_eq!(json, json!({"utm_campaign": "promo"}));
    }

    #[test]
    fn test_context_patch_coerces_scalars() {
        let patch = ContextPatch::from_value(&json!({
            "sessionId": 42,
            "flowId": "quiz",
            "stepId": null
        }))
        .unwrap();
        assert_eq!(patch.session_id.as_deref(), Some("42"));
        assert_eq!(patch.flow_id.as_deref(), Some("quiz"));
        assert!(patch.step_id.is_none());

        assert!(ContextPatch::from_value(&json!("not-an-object")).is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(1.5)));
        assert!(is_truthy(&json!({})));
        assert_eq!(truthy_string(&json!(123)).as_deref(), Some("123"));
        assert_eq!(truthy_string(&json!("")), None);
    }
}
