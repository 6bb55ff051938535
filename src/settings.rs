// =============================================================================
// Settings (C13) — simulator-facing knobs, hot-reloadable
// =============================================================================
//
// Companion store to `runtime_config.rs`'s operational envelope: the
// simulator-facing knobs from the data model (`risk_percent`, `rr_ratio`,
// `max_positions`, `leverage`, `auto_execute`, `enabled_tokens`,
// `custom_tokens`). Same atomic tmp+rename persistence idiom as
// `RuntimeConfig`; a setter updates the cached field and the backing file
// atomically so the simulator always reads the live value.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_risk_percent() -> f64 {
    1.0
}

fn default_rr_ratio() -> f64 {
    2.0
}

fn default_max_positions() -> u32 {
    3
}

fn default_leverage() -> f64 {
    10.0
}

fn default_enabled_tokens() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsData {
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    #[serde(default = "default_rr_ratio")]
    pub rr_ratio: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default)]
    pub auto_execute: bool,
    #[serde(default = "default_enabled_tokens")]
    pub enabled_tokens: Vec<String>,
    #[serde(default)]
    pub custom_tokens: Vec<String>,
}

impl Default for SettingsData {
    fn default() -> Self {
        Self {
            risk_percent: default_risk_percent(),
            rr_ratio: default_rr_ratio(),
            max_positions: default_max_positions(),
            leverage: default_leverage(),
            auto_execute: false,
            enabled_tokens: default_enabled_tokens(),
            custom_tokens: Vec::new(),
        }
    }
}

/// Thread-safe holder with atomic-write persistence. Every read goes through
/// `get()` so the simulator never sees a snapshot taken at construction.
pub struct Settings {
    path: PathBuf,
    data: RwLock<SettingsData>,
}

impl Settings {
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "settings file unparsable, using defaults");
                SettingsData::default()
            }),
            Err(_) => SettingsData::default(),
        };
        Self { path, data: RwLock::new(data) }
    }

    pub fn get(&self) -> SettingsData {
        self.data.read().clone()
    }

    /// Apply `mutator` to the in-memory settings and persist the result
    /// atomically. The lock is held only for the in-memory mutation, not
    /// the disk write, to keep reads cheap under contention.
    pub fn update(&self, mutator: impl FnOnce(&mut SettingsData)) -> Result<()> {
        let updated = {
            let mut data = self.data.write();
            mutator(&mut data);
            data.clone()
        };
        Self::persist(&self.path, &updated)?;
        Ok(())
    }

    fn persist(path: &Path, data: &SettingsData) -> Result<()> {
        let content = serde_json::to_string_pretty(data).context("failed to serialise settings to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;
        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_expected_values() {
        let s = SettingsData::default();
        assert_eq!(s.risk_percent, 1.0);
        assert_eq!(s.rr_ratio, 2.0);
        assert_eq!(s.max_positions, 3);
        assert!(!s.auto_execute);
        assert_eq!(s.enabled_tokens.len(), 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "risk_percent": 2.5 }"#;
        let s: SettingsData = serde_json::from_str(json).unwrap();
        assert_eq!(s.risk_percent, 2.5);
        assert_eq!(s.rr_ratio, 2.0);
        assert_eq!(s.max_positions, 3);
    }

    #[test]
    fn load_or_default_falls_back_when_file_absent() {
        let settings = Settings::load_or_default("/tmp/kline-sentinel-settings-does-not-exist.json");
        assert_eq!(settings.get().risk_percent, 1.0);
    }

    #[test]
    fn update_mutates_in_memory_state_immediately() {
        let dir = std::env::temp_dir().join(format!("kline-sentinel-settings-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        let settings = Settings::load_or_default(&path);
        settings.update(|s| s.risk_percent = 3.0).unwrap();
        assert_eq!(settings.get().risk_percent, 3.0);

        let reloaded = Settings::load_or_default(&path);
        assert_eq!(reloaded.get().risk_percent, 3.0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
