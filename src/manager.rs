//! The service object hosts construct and inject into callers
//!
//! Owns one instance of each component and wires them to a shared
//! [`StateStore`]. Callers observe state through [`ModelManager::current_state`]
//! snapshots or the [`ModelManager::subscribe`] event channel.

use crate::config::ManagerConfig;
use crate::engine::{InferenceEngine, InferencePreset};
use crate::error::ModelResult;
use crate::models::{
    CatalogSource, DownloadOrchestrator, LifecycleController, LoadOutcome, ModelRegistry,
    ModelRuntimeInfo, ModelTier,
};
use crate::state::{DownloadProgress, ManagerEvent, StateSnapshot, StateStore};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct ModelManager {
    config: ManagerConfig,
    store: Arc<StateStore>,
    registry: Arc<ModelRegistry>,
    downloads: Arc<DownloadOrchestrator>,
    lifecycle: LifecycleController,
}

impl ModelManager {
    /// Build the manager and populate the registry.
    ///
    /// Fails only on invalid configuration or HTTP client construction.
    pub async fn new(config: ManagerConfig, engine: Arc<dyn InferenceEngine>) -> Result<Self> {
        config.validate()?;

        let models_dir = config.models_dir();
        let engine_dir = engine.models_directory();
        if engine_dir != models_dir {
            tracing::warn!(
                models_dir = ?models_dir,
                engine_dir = ?engine_dir,
                "Engine models directory differs from configured directory"
            );
        }

        let store = Arc::new(StateStore::new(config.event_capacity));
        let registry = Arc::new(ModelRegistry::new(
            models_dir,
            Arc::clone(&engine),
            Arc::clone(&store),
        ));
        let downloads = Arc::new(DownloadOrchestrator::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&store),
        )?);
        let lifecycle = LifecycleController::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            engine,
            Arc::clone(&downloads),
            config.min_model_size_bytes,
            config.inference_preset,
        );

        let manager = Self {
            config,
            store,
            registry,
            downloads,
            lifecycle,
        };

        let count = manager.refresh().await;
        tracing::info!(
            models = count,
            models_dir = ?manager.models_dir(),
            "Model manager initialized"
        );

        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn models_dir(&self) -> &Path {
        self.registry.models_dir()
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Re-read the catalog, re-check files and adopt the engine's loaded model
    pub async fn refresh(&self) -> usize {
        let count = self.registry.refresh().await;
        self.lifecycle.reconcile_loaded().await;
        count
    }

    pub async fn models(&self) -> Vec<ModelRuntimeInfo> {
        self.registry.list().await
    }

    pub async fn model(&self, model_id: &str) -> Option<ModelRuntimeInfo> {
        self.registry.by_id(model_id).await
    }

    pub async fn is_downloaded(&self, model_id: &str) -> bool {
        self.registry
            .by_id(model_id)
            .await
            .is_some_and(|m| m.is_downloaded)
    }

    pub async fn downloaded_models(&self) -> Vec<ModelRuntimeInfo> {
        self.registry.downloaded().await
    }

    pub async fn models_by_tier(&self) -> BTreeMap<ModelTier, Vec<ModelRuntimeInfo>> {
        self.registry.grouped_by_tier().await
    }

    pub async fn catalog_source(&self) -> CatalogSource {
        self.registry.catalog_source().await
    }

    pub async fn model_path(&self, model_id: &str) -> Option<PathBuf> {
        self.registry.model_path(model_id).await
    }

    pub async fn total_downloaded_size(&self) -> u64 {
        self.registry.total_downloaded_size().await
    }

    pub async fn recommended_model(&self) -> String {
        self.registry.recommended_model().await
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    /// Start a download. False if unknown, unusable URL, or already in flight.
    pub async fn start_download(&self, model_id: &str) -> bool {
        self.downloads.start_download(model_id).await
    }

    pub async fn cancel_download(&self, model_id: &str) -> bool {
        self.downloads.cancel_download(model_id).await
    }

    pub async fn cancel_all_downloads(&self) -> usize {
        self.downloads.cancel_all().await
    }

    pub fn download_progress(&self, model_id: &str) -> Option<DownloadProgress> {
        self.store.download_progress(model_id)
    }

    pub fn is_downloading(&self, model_id: &str) -> bool {
        self.store.is_downloading(model_id)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn load_model(&self, model_id: &str) -> ModelResult<LoadOutcome> {
        self.lifecycle.load_model(model_id).await
    }

    pub async fn unload_model(&self) {
        self.lifecycle.unload_model().await
    }

    pub async fn delete_model(&self, model_id: &str) -> ModelResult<()> {
        self.lifecycle.delete_model(model_id).await
    }

    pub async fn import_model(&self, model_id: &str, source: &Path) -> ModelResult<()> {
        self.lifecycle.import_model(model_id, source).await
    }

    pub fn loaded_model_id(&self) -> Option<String> {
        self.store.loaded_model_id()
    }

    pub async fn inference_preset(&self) -> InferencePreset {
        self.lifecycle.inference_preset().await
    }

    pub async fn set_inference_preset(&self, preset: InferencePreset) {
        self.lifecycle.set_inference_preset(preset).await
    }

    // ------------------------------------------------------------------
    // Errors and observation
    // ------------------------------------------------------------------

    pub fn last_error(&self, model_id: &str) -> Option<String> {
        self.store.last_error(model_id)
    }

    pub fn clear_error(&self, model_id: &str) {
        self.store.clear_error(model_id)
    }

    pub fn current_state(&self) -> StateSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.store.subscribe()
    }

    /// Cancel every in-flight download, leaving the loaded model alone
    pub async fn shutdown(&self) {
        let cancelled = self.downloads.cancel_all().await;
        tracing::info!(cancelled_downloads = cancelled, "Model manager shut down");
    }
}
