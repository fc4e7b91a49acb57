//! Configuration structures and loading logic

use crate::engine::InferencePreset;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the models directory under the application support directory
pub const MODELS_SUBDIR: &str = "Models";

/// Main manager configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Application support directory; models live in `<dir>/Models`
    pub app_support_dir: PathBuf,
    /// Files smaller than this are treated as truncated downloads
    pub min_model_size_bytes: u64,
    pub connect_timeout_secs: u64,
    /// Maximum silence between body chunks before a transfer fails
    pub read_timeout_secs: u64,
    pub event_capacity: usize,
    /// Preset re-applied to the engine after every successful load
    pub inference_preset: InferencePreset,
    pub user_agent: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            app_support_dir: default_app_support_dir(),
            min_model_size_bytes: default_min_model_size(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            event_capacity: default_event_capacity(),
            inference_preset: InferencePreset::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(dir) = std::env::var("MODEL_MANAGER_APP_SUPPORT_DIR") {
            config.app_support_dir = PathBuf::from(dir);
        }
        if let Ok(size) = std::env::var("MODEL_MANAGER_MIN_MODEL_SIZE") {
            config.min_model_size_bytes = size
                .parse()
                .context("Invalid MODEL_MANAGER_MIN_MODEL_SIZE value")?;
        }
        if let Ok(timeout) = std::env::var("MODEL_MANAGER_CONNECT_TIMEOUT") {
            config.connect_timeout_secs = timeout
                .parse()
                .context("Invalid MODEL_MANAGER_CONNECT_TIMEOUT value")?;
        }
        if let Ok(preset) = std::env::var("MODEL_MANAGER_INFERENCE_PRESET") {
            config.inference_preset = preset
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid MODEL_MANAGER_INFERENCE_PRESET value")?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.app_support_dir.as_os_str().is_empty() {
            anyhow::bail!("app_support_dir cannot be empty");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be > 0");
        }
        if self.read_timeout_secs == 0 {
            anyhow::bail!("read_timeout_secs must be > 0");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be > 0");
        }
        Ok(())
    }

    /// Directory holding one file per model
    pub fn models_dir(&self) -> PathBuf {
        self.app_support_dir.join(MODELS_SUBDIR)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

// Default functions
fn default_app_support_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("model-manager")
}
fn default_min_model_size() -> u64 {
    100_000_000
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_read_timeout() -> u64 {
    300
}
fn default_event_capacity() -> usize {
    256
}
fn default_user_agent() -> String {
    format!("model-manager/{}", env!("CARGO_PKG_VERSION"))
}
