//! Debug switch and the `dev_log!` macro.
//!
//! Resolution order: explicit `set_debug_mode` call, then the page's global
//! override flag, then the host default (on for development hosts only).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::host::PageHost;

/// Emit a tracker diagnostic only while debug mode is on.
macro_rules! dev_log {
    ($switch:expr, $($arg:tt)+) => {
        if $switch.enabled() {
            ::tracing::info!($($arg)+);
        }
    };
}

const UNSET: u8 = 0;
const OFF: u8 = 1;
const ON: u8 = 2;

pub struct DebugSwitch {
    host: Arc<PageHost>,
    explicit: AtomicU8,
}

impl DebugSwitch {
    pub fn new(host: Arc<PageHost>) -> Self {
        Self {
            host,
            explicit: AtomicU8::new(UNSET),
        }
    }

    pub fn set(&self, enabled: bool) {
        self.explicit
            .store(if enabled { ON } else { OFF }, Ordering::SeqCst);
    }

    pub fn enabled(&self) -> bool {
        if !self.host.is_page() {
            return false;
        }
        match self.explicit.load(Ordering::SeqCst) {
            ON => return true,
            OFF => return false,
            _ => {}
        }
        if let Some(flag) = self.host.global_debug_flag() {
            if global_flag_enables(&flag) {
                return true;
            }
        }
        !self.host.is_production()
    }
}

/// Accepted truthy forms of the global override: `true`, `"true"`, `1`, `"1"`.
pub fn global_flag_enables(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || s == "1",
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

/// Script-tag attribute values that turn debug on. A bare attribute counts.
pub fn attribute_enables(attribute: &str) -> bool {
    matches!(
        attribute.to_ascii_lowercase().as_str(),
        "" | "true" | "1" | "yes"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn switch_for(url: &str) -> (Arc<PageHost>, DebugSwitch) {
        let host = Arc::new(PageHost::parse(url).unwrap());
        (Arc::clone(&host), DebugSwitch::new(host))
    }

    #[test]
    fn test_default_follows_host() {
        let (_, dev) = switch_for("http://localhost:5173/");
        assert!(dev.enabled());
        let (_, prod) = switch_for("https://leadlimpo.com.br/");
        assert!(!prod.enabled());
    }

    #[test]
    fn test_global_flag_forms() {
        let (host, switch) = switch_for("https://leadlimpo.com.br/");
        for flag in [json!(true), json!("true"), json!(1), json!("1")] {
            host.set_global_debug_flag(Some(flag.clone()));
            assert!(switch.enabled(), "{flag}");
        }
        for flag in [json!(false), json!("yes"), json!(0), json!(null)] {
            host.set_global_debug_flag(Some(flag.clone()));
            assert!(!switch.enabled(), "{flag}");
        }
    }

    #[test]
    fn test_explicit_call_wins() {
        let (host, switch) = switch_for("https://leadlimpo.com.br/");
        host.set_global_debug_flag(Some(json!(true)));
        switch.set(false);
        assert!(!switch.enabled());

        let (_, dev) = switch_for("http://localhost/");
        dev.set(false);
        assert!(!dev.enabled());
        dev.set(true);
        assert!(dev.enabled());
    }

    #[test]
    fn test_detached_host_never_debugs() {
        let switch = DebugSwitch::new(Arc::new(PageHost::detached()));
        switch.set(true);
        assert!(!switch.enabled());
    }

    #[test]
    fn test_attribute_values() {
        assert!(attribute_enables(""));
        assert!(attribute_enables("TRUE"));
        assert!(attribute_enables("yes"));
        assert!(!attribute_enables("0"));
        assert!(!attribute_enables("off"));
    }
}
