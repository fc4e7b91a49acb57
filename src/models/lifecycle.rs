//! Load slot state machine
//!
//! `Unloaded -> Loading -> Loaded -> Unloading -> Unloaded`. The engine holds
//! at most one model's weights, so load, unload and delete all run under a
//! single slot lock. The `is_loading_model` flag is claimed before the lock so
//! a redundant load returns immediately instead of queueing.

use super::download::DownloadOrchestrator;
use super::installer;
use super::registry::ModelRegistry;
use crate::engine::{InferenceEngine, InferencePreset};
use crate::error::{ModelError, ModelResult};
use crate::metrics;
use crate::state::StateStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Result of a successful `load_model` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// The engine loaded the model
    Loaded,
    /// The model was already in the slot; the engine was not contacted
    AlreadyLoaded,
    /// Another load is in flight; this call did nothing
    InProgress,
}

pub struct LifecycleController {
    registry: Arc<ModelRegistry>,
    store: Arc<StateStore>,
    engine: Arc<dyn InferenceEngine>,
    downloads: Arc<DownloadOrchestrator>,
    slot: Mutex<()>,
    preset: RwLock<InferencePreset>,
    min_model_size: u64,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<StateStore>,
        engine: Arc<dyn InferenceEngine>,
        downloads: Arc<DownloadOrchestrator>,
        min_model_size: u64,
        preset: InferencePreset,
    ) -> Self {
        Self {
            registry,
            store,
            engine,
            downloads,
            slot: Mutex::new(()),
            preset: RwLock::new(preset),
            min_model_size,
        }
    }

    /// Load a model into the engine, unloading any other model first.
    ///
    /// Failures are recorded against `model_id` and also returned.
    pub async fn load_model(&self, model_id: &str) -> ModelResult<LoadOutcome> {
        if !self.store.try_begin_loading() {
            tracing::debug!(model_id = %model_id, "Load already in progress, ignoring");
            return Ok(LoadOutcome::InProgress);
        }

        let _slot = self.slot.lock().await;
        let result = self.load_in_slot(model_id).await;

        match &result {
            Ok(LoadOutcome::Loaded) => {
                self.store.finish_loading(Some(model_id));

                let preset = *self.preset.read().await;
                self.engine.set_inference_preset(preset).await;
                tracing::info!(model_id = %model_id, preset = %preset, "Model loaded");
            }
            Ok(_) => self.store.finish_loading(None),
            Err(e) => {
                self.store.record_error(model_id, e);
                self.store.finish_loading(None);
            }
        }

        result
    }

    async fn load_in_slot(&self, model_id: &str) -> ModelResult<LoadOutcome> {
        let current = self.store.loaded_model_id();
        if current.as_deref() == Some(model_id) {
            tracing::debug!(model_id = %model_id, "Model already loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        if let Some(previous) = current {
            tracing::info!(previous = %previous, next = %model_id, "Unloading current model before load");
            self.unload_in_slot().await;
        }

        self.validate(model_id).await?;
        self.store.clear_error(model_id);

        tracing::info!(model_id = %model_id, "Loading model");
        match self.engine.load_model(model_id).await {
            Ok(()) => {
                metrics::record_model_load(model_id, true);
                Ok(LoadOutcome::Loaded)
            }
            Err(message) => {
                metrics::record_model_load(model_id, false);
                Err(ModelError::LoadFailed(message))
            }
        }
    }

    /// Check the registry and the file on disk before the engine sees the model
    async fn validate(&self, model_id: &str) -> ModelResult<()> {
        let model = self
            .registry
            .by_id(model_id)
            .await
            .ok_or(ModelError::NotFound)?;

        if !model.is_downloaded {
            return Err(ModelError::NotDownloaded);
        }

        let path = self.registry.models_dir().join(&model.descriptor.filename);
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                tracing::warn!(model_id = %model_id, path = ?path, "Registry is stale, model file is gone");
                self.registry.refresh().await;
                return Err(ModelError::FileMissingOnDisk);
            }
        };

        if size < self.min_model_size {
            tracing::warn!(
                model_id = %model_id,
                size = size,
                minimum = self.min_model_size,
                "Model file too small, treating as truncated"
            );
            return Err(ModelError::FileCorrupted);
        }

        Ok(())
    }

    /// Release the loaded model. Safe when nothing is loaded.
    pub async fn unload_model(&self) {
        let _slot = self.slot.lock().await;
        self.unload_in_slot().await;
    }

    async fn unload_in_slot(&self) {
        let previous = self.store.loaded_model_id();

        self.store.begin_unloading();
        self.engine.unload_model().await;
        self.store.finish_unloading();

        if let Some(model_id) = previous {
            tracing::info!(model_id = %model_id, "Model unloaded");
            metrics::record_model_unload();
        }
    }

    /// Adopt the engine's loaded model id.
    ///
    /// Runs under the slot lock and asks the engine directly, so a load or
    /// unload finishing meanwhile cannot be overwritten by an older answer.
    pub async fn reconcile_loaded(&self) {
        let _slot = self.slot.lock().await;
        let loaded = self.engine.loaded_model_id().await;
        self.store
            .reconcile_loaded((!loaded.is_empty()).then_some(loaded));
    }

    /// Remove a model from disk, cancelling its download and unloading it first
    pub async fn delete_model(&self, model_id: &str) -> ModelResult<()> {
        self.downloads.cancel_download(model_id).await;

        let result = {
            let _slot = self.slot.lock().await;

            if self.store.loaded_model_id().as_deref() == Some(model_id) {
                self.unload_in_slot().await;
            }
            self.store.clear_error(model_id);

            if self.engine.delete_model(model_id).await {
                Ok(())
            } else {
                tracing::debug!(model_id = %model_id, "Engine delete failed, removing file directly");
                self.remove_model_files(model_id).await
            }
        };

        match &result {
            Ok(()) => {
                self.registry.refresh().await;
                tracing::info!(model_id = %model_id, "Model deleted");
                metrics::record_model_deleted(model_id);
            }
            Err(e) => self.store.record_error(model_id, e),
        }

        result
    }

    async fn remove_model_files(&self, model_id: &str) -> ModelResult<()> {
        let path = self
            .registry
            .model_path(model_id)
            .await
            .ok_or(ModelError::NotFound)?;

        installer::discard(&installer::temp_path_for(&path)).await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ModelError::DeleteFailed(e.to_string())),
        }
    }

    /// Hand a local file to the engine's import primitive
    pub async fn import_model(&self, model_id: &str, source: &Path) -> ModelResult<()> {
        self.store.clear_error(model_id);

        let result = if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            Err(ModelError::ImportFailed(format!(
                "source file does not exist: {}",
                source.display()
            )))
        } else if self.engine.import_model(model_id, source).await {
            Ok(())
        } else {
            Err(ModelError::ImportFailed(format!(
                "engine rejected {}",
                source.display()
            )))
        };

        match &result {
            Ok(()) => {
                self.registry.refresh().await;
                tracing::info!(model_id = %model_id, source = ?source, "Model imported");
            }
            Err(e) => self.store.record_error(model_id, e),
        }

        result
    }

    pub async fn inference_preset(&self) -> InferencePreset {
        *self.preset.read().await
    }

    /// Store the preset and apply it immediately if a model is loaded
    pub async fn set_inference_preset(&self, preset: InferencePreset) {
        *self.preset.write().await = preset;

        let _slot = self.slot.lock().await;
        if self.store.loaded_model_id().is_some() {
            self.engine.set_inference_preset(preset).await;
        }
        tracing::info!(preset = %preset, "Inference preset updated");
    }
}
