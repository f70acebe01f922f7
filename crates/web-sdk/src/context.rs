//! Session/flow/step context, persisted in session storage, plus the base
//! payload every funnel event starts from.

use std::sync::Arc;

use leadlimpo_core::types::storage_keys;
use leadlimpo_core::{ContactRecord, ContextPatch, ContextSnapshot, Payload, SessionContext};
use parking_lot::Mutex;
use serde_json::Value;

use crate::attribution::{self, CAMPAIGN_KEYS};
use crate::host::PageHost;

pub struct ContextManager {
    host: Arc<PageHost>,
    state: Mutex<SessionContext>,
}

impl ContextManager {
    pub fn new(host: Arc<PageHost>) -> Self {
        Self {
            host,
            state: Mutex::new(SessionContext::default()),
        }
    }

    /// Restore identifiers from session storage. Each one is restored on its
    /// own; a missing key leaves the others untouched.
    pub fn restore(&self) {
        let storage = self.host.session_storage();
        let mut state = self.state.lock();
        if let Some(id) = storage.get_non_empty(storage_keys::SESSION_ID) {
            state.session_id = Some(id);
        }
        if let Some(id) = storage.get_non_empty(storage_keys::FLOW_ID) {
            state.flow_id = Some(id);
        }
        if let Some(id) = storage.get_non_empty(storage_keys::STEP_ID) {
            state.step_id = Some(id);
        }
    }

    /// Apply `patch` and persist the whole context.
    pub fn apply(&self, patch: &ContextPatch) {
        let mut state = self.state.lock();
        if let Some(id) = &patch.session_id {
            state.session_id = Some(id.clone());
        }
        if let Some(id) = &patch.flow_id {
            state.flow_id = Some(id.clone());
        }
        if let Some(id) = &patch.step_id {
            state.step_id = Some(id.clone());
        }
        self.persist(&state);
    }

    /// Loosely typed variant of [`apply`](Self::apply); non-objects are ignored.
    pub fn apply_value(&self, raw: &Value) {
        if let Some(patch) = ContextPatch::from_value(raw) {
            self.apply(&patch);
        }
    }

    fn persist(&self, state: &SessionContext) {
        let storage = self.host.session_storage();
        let fields = [
            (storage_keys::SESSION_ID, &state.session_id),
            (storage_keys::FLOW_ID, &state.flow_id),
            (storage_keys::STEP_ID, &state.step_id),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                storage.set(key, value);
            }
        }
    }

    /// Derive the flow id from the page path when none is known yet.
    /// Returns the flow id that was set, if any.
    pub fn ensure_flow_from_path(&self, default_flow: &str) -> Option<String> {
        if self.current().flow_id.as_deref().is_some_and(|f| !f.is_empty()) {
            return None;
        }
        let path = self.host.path()?;
        let slug = path.trim_start_matches('/');
        let flow = if slug.is_empty() { default_flow } else { slug };
        self.apply(&ContextPatch::flow(flow));
        Some(flow.to_string())
    }

    pub fn current(&self) -> SessionContext {
        self.state.lock().clone()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.current();
        ContextSnapshot {
            session_id: state.session_id,
            flow_id: state.flow_id,
            step_id: state.step_id,
            utms: attribution::combined(&self.host),
        }
    }

    /// Persist any supplied contact field, overwriting the stored one.
    pub fn save_contact(&self, contact: &ContactRecord) {
        let storage = self.host.session_storage();
        if let Some(phone) = &contact.phone {
            storage.set(storage_keys::PHONE, phone);
        }
        if let Some(email) = &contact.email {
            storage.set(storage_keys::EMAIL, email);
        }
    }

    pub fn stored_contact(&self) -> ContactRecord {
        let storage = self.host.session_storage();
        ContactRecord {
            phone: storage.get_non_empty(storage_keys::PHONE),
            email: storage.get_non_empty(storage_keys::EMAIL),
        }
    }

    /// Context identifiers and campaign fields, overlaid with `extra`.
    /// Absent identifiers are left out of the record.
    pub fn base_payload(&self, extra: Option<&Payload>) -> Payload {
        let state = self.current();
        let utms = attribution::combined(&self.host);
        let mut payload = Payload::new();

        for (key, value) in [
            ("session_id", state.session_id),
            ("flow_id", state.flow_id),
            ("step_id", state.step_id),
        ] {
            if let Some(value) = value {
                payload.insert(key.to_string(), Value::String(value));
            }
        }
        for key in CAMPAIGN_KEYS {
            if let Some(value) = utms.get(key) {
                payload.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        if let Some(extra) = extra {
            for (key, value) in extra {
                payload.insert(key.clone(), value.clone());
            }
        }
        payload
    }
}
