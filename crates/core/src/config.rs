//! Engine options – deserialised by the front-ends from their config sources.

use crate::env::{parse_assignment, EnvStore};
use crate::platform::{detect_system_encoding, TextEncoding};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EngineConfigError {
    #[error("unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("invalid env assignment '{0}', expected KEY=VALUE")]
    InvalidAssignment(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable; bare names are resolved through `PATH`.
    pub program: PathBuf,
    /// Codec label, or `auto` to follow the system locale.
    pub encoding: String,
    pub debounce_ms: u64,
    pub inherit_env: bool,
    /// Initial store contents as `KEY=VALUE`.
    pub env: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("lpac"),
            encoding: "utf-8".to_string(),
            debounce_ms: 500,
            inherit_env: true,
            env: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn text_encoding(&self) -> Result<TextEncoding, EngineConfigError> {
        let label = if self.encoding.trim().eq_ignore_ascii_case("auto") {
            detect_system_encoding()
        } else {
            self.encoding.clone()
        };
        TextEncoding::for_label(&label).ok_or(EngineConfigError::UnsupportedEncoding(label))
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Build a fresh store from `env`. Later assignments win.
    pub fn seed_env(&self) -> Result<EnvStore, EngineConfigError> {
        let store = EnvStore::new();
        for raw in &self.env {
            let (key, value) = parse_assignment(raw)
                .ok_or_else(|| EngineConfigError::InvalidAssignment(raw.clone()))?;
            store.set(key, value);
        }
        Ok(store)
    }
}
