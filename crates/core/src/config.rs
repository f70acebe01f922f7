use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Root tracker configuration. Loaded from environment variables with the
/// prefix `LEADLIMPO__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub pixel: PixelConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_pixel_window_ms")]
    pub pixel_window_ms: u64,
    #[serde(default = "default_data_layer_window_ms")]
    pub data_layer_window_ms: u64,
    #[serde(default = "default_data_layer_retention_ms")]
    pub data_layer_retention_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PixelConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Upper bound on availability polls. `None` keeps polling for the page
    /// lifetime.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunnelConfig {
    #[serde(default = "default_flow")]
    pub default_flow: String,
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

// Default functions
fn default_pixel_window_ms() -> u64 {
    30_000
}
fn default_data_layer_window_ms() -> u64 {
    5_000
}
fn default_data_layer_retention_ms() -> u64 {
    60_000
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_flow() -> String {
    "default_flow".to_string()
}
fn default_currency() -> String {
    "BRL".to_string()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            pixel_window_ms: default_pixel_window_ms(),
            data_layer_window_ms: default_data_layer_window_ms(),
            data_layer_retention_ms: default_data_layer_retention_ms(),
        }
    }
}

impl Default for PixelConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: None,
        }
    }
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            default_flow: default_flow(),
            default_currency: default_currency(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            dedup: DedupConfig::default(),
            pixel: PixelConfig::default(),
            funnel: FunnelConfig::default(),
        }
    }
}

impl PixelConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, with environment
    /// variables layered on top.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("LEADLIMPO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tracker_windows() {
        let config = TrackerConfig::default();
        assert_eq!(config.dedup.pixel_window_ms, 30_000);
        assert_eq!(config.dedup.data_layer_window_ms, 5_000);
        assert_eq!(config.dedup.data_layer_retention_ms, 60_000);
        assert_eq!(config.pixel.retry_delay(), Duration::from_secs(1));
        assert!(config.pixel.max_retries.is_none());
        assert_eq!(config.funnel.default_flow, "default_flow");
        assert_eq!(config.funnel.default_currency, "BRL");
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{"pixel": {"max_retries": 3}, "funnel": {"default_currency": "USD"}}"#,
        )
        .unwrap();
        assert_eq!(config.pixel.max_retries, Some(3));
        assert_eq!(config.pixel.retry_delay_ms, 1_000);
        assert_eq!(config.funnel.default_currency, "USD");
        assert_eq!(config.funnel.default_flow, "default_flow");
        assert_eq!(config.dedup.pixel_window_ms, 30_000);
    }
}
