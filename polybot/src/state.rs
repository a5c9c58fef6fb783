//! Persistent bot state, kept as a JSON object between runs.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Key/value state owned by the bot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State(Map<String, Value>);

impl State {
    /// Load state from `path`. A missing file yields empty state.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No state file found");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let map = serde_json::from_slice(&data)
            .with_context(|| format!("Bad state file {}", path.display()))?;
        Ok(Self(map))
    }

    /// Write state to `path`. Empty state is not written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.0.is_empty() {
            return Ok(());
        }
        tracing::info!("Saving state...");
        let data = serde_json::to_vec_pretty(&self.0)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move state into {}", path.display()))?;
        Ok(())
    }

    /// Typed lookup. `None` if the key is missing or has a different shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.0.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring state entry with unexpected shape");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        self.0.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
