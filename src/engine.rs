//! Contract consumed from the inference engine
//!
//! The engine owns the actual model weights. This crate only drives it through
//! the small surface below; everything else (text analysis, prompting) stays
//! on the engine side.

use crate::models::ModelDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Speed/quality tradeoff applied to the engine after each load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferencePreset {
    Fast,
    #[default]
    Balanced,
    Quality,
}

impl std::fmt::Display for InferencePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Balanced => write!(f, "balanced"),
            Self::Quality => write!(f, "quality"),
        }
    }
}

impl std::str::FromStr for InferencePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            other => Err(format!("Unknown inference preset: {}", other)),
        }
    }
}

/// Inference engine holding at most one model in memory
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Dynamic catalog. An empty list means "use the static catalog".
    async fn available_models(&self) -> Vec<ModelDescriptor>;

    /// Currently loaded model id, empty when nothing is loaded
    async fn loaded_model_id(&self) -> String;

    /// Load the model's weights. May take several seconds.
    async fn load_model(&self, model_id: &str) -> Result<(), String>;

    /// Release the loaded model. A no-op when nothing is loaded.
    async fn unload_model(&self);

    async fn is_model_loaded(&self) -> bool;

    /// Native delete. `false` means the caller should fall back to removing the file.
    async fn delete_model(&self, model_id: &str) -> bool;

    async fn import_model(&self, model_id: &str, source_path: &Path) -> bool;

    /// Directory the engine expects model files in
    fn models_directory(&self) -> PathBuf;

    async fn set_inference_preset(&self, preset: InferencePreset);
}
