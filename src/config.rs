//! Runtime configuration: JSON file, environment overrides, then validation.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::fountain::{DEFAULT_MAX_PENDING, DEFAULT_MIX_THRESHOLD};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Frame sizing and reassembly limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_fragment_len: usize,
    /// Mix fragments above this frame count; `null` disables mixing
    pub mix_threshold: Option<u32>,
    pub max_pending_messages: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_fragment_len: 600,
            mix_threshold: Some(DEFAULT_MIX_THRESHOLD),
            max_pending_messages: DEFAULT_MAX_PENDING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub frames_per_second: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            frames_per_second: 3.0,
        }
    }
}

impl Config {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        Config::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> anyhow::Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(value) = lookup("AIRGAP_MAX_FRAGMENT_LEN") {
            self.transport.max_fragment_len = value
                .parse()
                .with_context(|| format!("AIRGAP_MAX_FRAGMENT_LEN={}", value))?;
        }
        if let Some(value) = lookup("AIRGAP_MIX_THRESHOLD") {
            self.transport.mix_threshold = match value.as_str() {
                "" | "off" | "none" => None,
                other => Some(
                    other
                        .parse()
                        .with_context(|| format!("AIRGAP_MIX_THRESHOLD={}", value))?,
                ),
            };
        }
        if let Some(value) = lookup("AIRGAP_MAX_PENDING") {
            self.transport.max_pending_messages = value
                .parse()
                .with_context(|| format!("AIRGAP_MAX_PENDING={}", value))?;
        }
        if let Some(value) = lookup("AIRGAP_FRAMES_PER_SECOND") {
            self.display.frames_per_second = value
                .parse()
                .with_context(|| format!("AIRGAP_FRAMES_PER_SECOND={}", value))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.transport.max_fragment_len == 0 {
            bail!("max_fragment_len must be positive");
        }
        if self.transport.max_pending_messages == 0 {
            bail!("max_pending_messages must be positive");
        }
        let fps = self.display.frames_per_second;
        if !fps.is_finite() || fps <= 0.0 {
            bail!("frames_per_second must be a positive number, got {}", fps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transport.max_fragment_len, 600);
        assert_eq!(config.display.frames_per_second, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: Config =
            serde_json::from_str(r#"{"transport": {"max_fragment_len": 200}}"#).unwrap();
        assert_eq!(config.transport.max_fragment_len, 200);
        assert_eq!(config.transport.mix_threshold, Some(DEFAULT_MIX_THRESHOLD));
        assert_eq!(config.display, DisplayConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default()
            .with_overrides(env(&[
                ("AIRGAP_MAX_FRAGMENT_LEN", "250"),
                ("AIRGAP_MIX_THRESHOLD", "off"),
                ("AIRGAP_FRAMES_PER_SECOND", "8"),
            ]))
            .unwrap();
        assert_eq!(config.transport.max_fragment_len, 250);
        assert_eq!(config.transport.mix_threshold, None);
        assert_eq!(config.display.frames_per_second, 8.0);
    }

    #[test]
    fn test_invalid_overrides() {
        assert!(Config::default()
            .with_overrides(env(&[("AIRGAP_MAX_FRAGMENT_LEN", "zero")]))
            .is_err());
        assert!(Config::default()
            .with_overrides(env(&[("AIRGAP_FRAMES_PER_SECOND", "0")]))
            .is_err());
        assert!(Config::default()
            .with_overrides(env(&[("AIRGAP_MAX_PENDING", "0")]))
            .is_err());
    }
}
