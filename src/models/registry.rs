//! Model registry: the catalog of known models and their on-disk status
//!
//! The registry never writes or deletes files. Download status is recomputed
//! from file presence on every refresh; entries are replaced wholesale, never
//! mutated in place.

use super::catalog::{ModelDescriptor, ModelTier, default_model_id, static_catalog};
use crate::engine::InferenceEngine;
use crate::state::{ManagerEvent, StateStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Allowed deviation between the expected and actual file size
const SIZE_TOLERANCE: f64 = 0.10;

/// Descriptor plus download status derived from the filesystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRuntimeInfo {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub is_downloaded: bool,
}

impl ModelRuntimeInfo {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

/// Where the current catalog came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Static,
    Engine,
}

pub struct ModelRegistry {
    models_dir: PathBuf,
    engine: Arc<dyn InferenceEngine>,
    store: Arc<StateStore>,
    models: RwLock<Vec<ModelRuntimeInfo>>,
    source: RwLock<CatalogSource>,
    refreshing: Mutex<()>,
}

impl ModelRegistry {
    /// Create an empty registry, creating the models directory if needed.
    ///
    /// Directory creation failure is not fatal: every model simply reads as
    /// not downloaded until a later refresh succeeds.
    pub fn new(models_dir: PathBuf, engine: Arc<dyn InferenceEngine>, store: Arc<StateStore>) -> Self {
        if let Err(e) = std::fs::create_dir_all(&models_dir) {
            tracing::warn!(
                models_dir = ?models_dir,
                error = %e,
                "Failed to create models directory"
            );
        }

        Self {
            models_dir,
            engine,
            store,
            models: RwLock::new(Vec::new()),
            source: RwLock::new(CatalogSource::Static),
            refreshing: Mutex::new(()),
        }
    }

    /// Create a registry and populate it immediately
    pub async fn init(
        models_dir: PathBuf,
        engine: Arc<dyn InferenceEngine>,
        store: Arc<StateStore>,
    ) -> Self {
        let registry = Self::new(models_dir, engine, store);
        registry.refresh().await;
        registry
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Rebuild the catalog and re-check every model file.
    ///
    /// Returns the number of known models.
    pub async fn refresh(&self) -> usize {
        // Concurrent refreshes must not publish stale results out of order
        let _refreshing = self.refreshing.lock().await;

        let dynamic = self.engine.available_models().await;
        let (descriptors, source) = if dynamic.is_empty() {
            (static_catalog(), CatalogSource::Static)
        } else {
            (dynamic, CatalogSource::Engine)
        };

        let mut entries = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let is_downloaded = file_len(&self.models_dir.join(&descriptor.filename))
                .await
                .is_some();
            entries.push(ModelRuntimeInfo {
                descriptor,
                is_downloaded,
            });
        }

        {
            let mut current = self.source.write().await;
            if *current != source {
                tracing::info!(from = ?*current, to = ?source, "Model catalog source changed");
                *current = source;
            }
        }

        let count = entries.len();
        let downloaded = entries.iter().filter(|e| e.is_downloaded).count();
        *self.models.write().await = entries;

        tracing::debug!(
            models = count,
            downloaded = downloaded,
            source = ?source,
            "Model registry refreshed"
        );
        self.store
            .emit(ManagerEvent::RegistryRefreshed { model_count: count });

        count
    }

    /// Get a model by id
    pub async fn by_id(&self, model_id: &str) -> Option<ModelRuntimeInfo> {
        let models = self.models.read().await;
        models.iter().find(|m| m.descriptor.id == model_id).cloned()
    }

    pub async fn contains(&self, model_id: &str) -> bool {
        self.by_id(model_id).await.is_some()
    }

    /// All models in catalog order
    pub async fn list(&self) -> Vec<ModelRuntimeInfo> {
        self.models.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn downloaded(&self) -> Vec<ModelRuntimeInfo> {
        let models = self.models.read().await;
        models.iter().filter(|m| m.is_downloaded).cloned().collect()
    }

    pub async fn grouped_by_tier(&self) -> BTreeMap<ModelTier, Vec<ModelRuntimeInfo>> {
        let models = self.models.read().await;
        let mut groups: BTreeMap<ModelTier, Vec<ModelRuntimeInfo>> = BTreeMap::new();
        for model in models.iter() {
            groups
                .entry(model.descriptor.tier)
                .or_default()
                .push(model.clone());
        }
        groups
    }

    pub async fn catalog_source(&self) -> CatalogSource {
        *self.source.read().await
    }

    /// Canonical destination path for a model
    pub async fn model_path(&self, model_id: &str) -> Option<PathBuf> {
        self.by_id(model_id)
            .await
            .map(|m| self.models_dir.join(&m.descriptor.filename))
    }

    /// Size of the model file on disk, read now
    pub async fn file_size(&self, model_id: &str) -> Option<u64> {
        let path = self.model_path(model_id).await?;
        file_len(&path).await
    }

    /// Total bytes of all model files currently on disk
    pub async fn total_downloaded_size(&self) -> u64 {
        let paths: Vec<PathBuf> = self
            .models
            .read()
            .await
            .iter()
            .map(|m| self.models_dir.join(&m.descriptor.filename))
            .collect();

        let mut total = 0;
        for path in paths {
            total += file_len(&path).await.unwrap_or(0);
        }
        total
    }

    /// Recommended model: the catalog default, else the static default id
    pub async fn recommended_model(&self) -> String {
        let models = self.models.read().await;
        models
            .iter()
            .find(|m| m.descriptor.is_default)
            .map(|m| m.descriptor.id.clone())
            .unwrap_or_else(|| default_model_id().to_string())
    }

    /// Whether the file on disk is within tolerance of the expected size.
    ///
    /// Advisory only. `None` when the model or file is unknown.
    pub async fn size_matches_expected(&self, model_id: &str) -> Option<bool> {
        let model = self.by_id(model_id).await?;
        let actual = self.file_size(model_id).await?;
        Some(within_tolerance(actual, model.descriptor.size_bytes))
    }
}

/// Size of a regular file at `path`, or `None` if there is none
async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

fn within_tolerance(actual: u64, expected: u64) -> bool {
    let min = (expected as f64 * (1.0 - SIZE_TOLERANCE)) as u64;
    let max = (expected as f64 * (1.0 + SIZE_TOLERANCE)) as u64;
    actual >= min && actual <= max
}
