use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mode::DEFAULT_MODE;

const DEFAULT_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_INITIAL_SCAN_MS: u64 = 2000;
const DEFAULT_IDLE_POLL_MS: u64 = 100;
const MIN_DEBOUNCE_MS: u64 = 50;
const CONFIG_SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_MODEL_QUERY_PARAM: &str = "model";
pub const DEFAULT_THINKING_MARKER: &str = "Thinking...";
pub const DEFAULT_THINKING_LABEL: &str = "o1-preview";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub schema_version: u32,
    pub store: StoreConfig,
    pub document: DocumentConfig,
    pub modes: ModeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Store file; relative paths resolve against the monitor home.
    pub path: Option<String>,
    /// Serialize merges from several monitors sharing one store file.
    pub exclusive_writer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DocumentConfig {
    /// Rendered document to watch when none is given on the command line.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModeConfig {
    pub model_query_param: String,
    pub thinking_marker: String,
    pub thinking_label: String,
    pub fallback_label: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub debounce_window: Duration,
    pub initial_scan_delay: Duration,
    pub idle_poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            store: StoreConfig::default(),
            document: DocumentConfig::default(),
            modes: ModeConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            exclusive_writer: true,
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            model_query_param: DEFAULT_MODEL_QUERY_PARAM.to_string(),
            thinking_marker: DEFAULT_THINKING_MARKER.to_string(),
            thinking_label: DEFAULT_THINKING_LABEL.to_string(),
            fallback_label: DEFAULT_MODE.to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn load_or_init() -> Result<Self> {
        let cfg_path = config_path();
        if let Some(parent) = cfg_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        if cfg_path.exists() {
            let raw = fs::read_to_string(&cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            let mut parsed: MonitorConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?;
            if parsed.normalize_and_migrate() {
                parsed.save()?;
            }
            Ok(parsed)
        } else {
            let cfg = MonitorConfig::default();
            cfg.save()?;
            Ok(cfg)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        match self.store.path.as_deref() {
            Some(custom) => {
                let custom = PathBuf::from(custom);
                if custom.is_absolute() {
                    custom
                } else {
                    monitor_home().join(custom)
                }
            }
            None => default_store_path(),
        }
    }

    pub fn document_path(&self) -> Option<PathBuf> {
        self.document.path.as_deref().map(PathBuf::from)
    }

    fn normalize_and_migrate(&mut self) -> bool {
        let mut changed = false;

        if self.schema_version < CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
            changed = true;
        }

        if normalize_optional_string(&mut self.store.path) {
            changed = true;
        }
        if normalize_optional_string(&mut self.document.path) {
            changed = true;
        }

        let defaults = ModeConfig::default();
        for (value, default) in [
            (&mut self.modes.model_query_param, defaults.model_query_param),
            (&mut self.modes.thinking_label, defaults.thinking_label),
            (&mut self.modes.fallback_label, defaults.fallback_label),
        ] {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                *value = default;
                changed = true;
            } else if *value != trimmed {
                *value = trimmed;
                changed = true;
            }
        }
        // Empty disables the heuristic; whitespace-only is treated as unset.
        let marker = &self.modes.thinking_marker;
        if !marker.is_empty() && marker.trim().is_empty() {
            self.modes.thinking_marker = defaults.thinking_marker;
            changed = true;
        }

        changed
    }
}

pub fn runtime_settings() -> RuntimeSettings {
    RuntimeSettings {
        debounce_window: Duration::from_millis(
            env_u64("CHAT_TOKEN_MONITOR_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS).max(MIN_DEBOUNCE_MS),
        ),
        initial_scan_delay: Duration::from_millis(env_u64(
            "CHAT_TOKEN_MONITOR_INITIAL_SCAN_MS",
            DEFAULT_INITIAL_SCAN_MS,
        )),
        idle_poll_interval: Duration::from_millis(env_u64(
            "CHAT_TOKEN_MONITOR_IDLE_POLL_MS",
            DEFAULT_IDLE_POLL_MS,
        )),
    }
}

pub fn monitor_home() -> PathBuf {
    if let Ok(custom) = env::var("CHAT_TOKEN_MONITOR_HOME") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chat-token-monitor")
}

pub fn config_path() -> PathBuf {
    monitor_home().join("config.json")
}

pub fn default_store_path() -> PathBuf {
    monitor_home().join("store.json")
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn normalize_optional_string(value: &mut Option<String>) -> bool {
    if let Some(item) = value.as_mut() {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            *value = None;
            return true;
        }
        if *item != trimmed {
            *item = trimmed;
            return true;
        }
    }
    false
}
