//! Bridge settings
//!
//! Loaded from a JSON file; every field may be omitted.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SOURCE_URL_PREFIX: &str = "io.latch.plugin.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// Prefix of every injected stub's sourceURL.
    pub source_url_prefix: String,
    pub trace_messages: bool,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub memory_limit_bytes: Option<usize>,
    pub max_stack_size_bytes: Option<usize>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            source_url_prefix: DEFAULT_SOURCE_URL_PREFIX.to_owned(),
            trace_messages: false,
            engine: EngineSettings::default(),
        }
    }
}

impl BridgeSettings {
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::Settings(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Settings(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Unrecognised levels fall back to `info`.
    pub fn max_level(&self) -> tracing::Level {
        self.log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
