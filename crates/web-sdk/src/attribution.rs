//! Campaign attribution (`utm_*`) harvested from the page URL and kept in
//! session storage.

use leadlimpo_cache::SafeStorage;
use leadlimpo_core::types::{storage_keys, truthy_string};
use leadlimpo_core::Attribution;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::host::PageHost;

/// Campaign parameters carried as first-class payload fields.
pub const CAMPAIGN_KEYS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
];

const CAMPAIGN_PREFIX: &str = "utm_";

/// Campaign parameters in the current URL. The first non-empty occurrence of
/// each `utm_` parameter wins.
pub fn from_url(host: &PageHost) -> Attribution {
    let mut attribution = Attribution::new();
    for (key, value) in host.query_pairs() {
        if key.starts_with(CAMPAIGN_PREFIX) && !attribution.contains_key(&key) {
            attribution.insert(key, value);
        }
    }
    attribution
}

/// Snapshot persisted in session storage. Unreadable state is empty.
pub fn stored(storage: &SafeStorage) -> Attribution {
    let raw: BTreeMap<String, Value> = storage.get_json(storage_keys::UTMS).unwrap_or_default();
    raw.into_iter()
        .filter_map(|(key, value)| truthy_string(&value).map(|v| (key, v)))
        .collect()
}

/// Merge `incoming` into the stored snapshot and persist it.
pub fn save(storage: &SafeStorage, incoming: &Attribution) {
    let mut merged = stored(storage);
    merged.overlay(incoming);
    merged.prune_empty();
    storage.set_json(storage_keys::UTMS, &merged);
}

/// Live view: stored snapshot overlaid with non-empty URL values.
pub fn combined(host: &PageHost) -> Attribution {
    let mut merged = stored(host.session_storage());
    merged.overlay(&from_url(host));
    merged
}
