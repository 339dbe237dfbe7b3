use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracewayError};

/// Settings for the export pipeline, loadable from TOML with `TRACEWAY_*`
/// environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Manager-level bound on each supervising task join during shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Exporter-level bound on the final in-flight task sweep. Independent
    /// of the shutdown timeout; the two budgets apply at different levels.
    #[serde(default = "default_sweep_timeout_secs")]
    pub sweep_timeout_secs: u64,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub jsonl_path: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            sweep_timeout_secs: default_sweep_timeout_secs(),
            redaction: RedactionConfig::default(),
            jsonl_path: None,
        }
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    120
}

fn default_sweep_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedactionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub force_redact: bool,
    /// Header names the redaction decision is derived from.
    #[serde(default)]
    pub headers: Vec<String>,
    /// Span attribute keys replaced by the sentinel when redacting.
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force_redact: false,
            headers: Vec::new(),
            attributes: Vec::new(),
            sentinel: default_sentinel(),
        }
    }
}

fn default_sentinel() -> String {
    "[REDACTED]".into()
}

impl TelemetryConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_secs(self.sweep_timeout_secs)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| TracewayError::Config(format!("failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Environment overrides on top of whatever is already loaded.
    pub fn apply_env(&mut self) {
        if let Ok(secs) = env::var("TRACEWAY_SHUTDOWN_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                self.shutdown_timeout_secs = parsed;
            }
        }
        if let Ok(secs) = env::var("TRACEWAY_SWEEP_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                self.sweep_timeout_secs = parsed;
            }
        }
        if let Ok(enabled) = env::var("TRACEWAY_REDACTION_ENABLED") {
            if let Ok(parsed) = enabled.parse::<bool>() {
                self.redaction.enabled = parsed;
            }
        }
        if let Ok(force) = env::var("TRACEWAY_REDACTION_FORCE") {
            if let Ok(parsed) = force.parse::<bool>() {
                self.redaction.force_redact = parsed;
            }
        }
        if let Ok(path) = env::var("TRACEWAY_JSONL_PATH") {
            self.jsonl_path = Some(path);
        }
    }
}
