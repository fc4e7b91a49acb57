//! Single source of truth for download progress, per-model errors and the
//! load slot
//!
//! Each field has exactly one writer: the download orchestrator owns progress
//! entries, the lifecycle controller owns [`LifecycleState`]. Mutators are
//! crate-private; external readers only see clones and [`StateSnapshot`]s, or
//! subscribe to [`ManagerEvent`]s.

use crate::error::ModelError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Per-download state machine: `starting -> downloading -> terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Starting,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Downloading => write!(f, "downloading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Normalized progress record for one in-flight download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub model_id: String,
    pub bytes_downloaded: u64,
    /// Server-reported length, or the descriptor's expected size
    pub total_bytes: u64,
    pub status: DownloadStatus,
    /// Derived from the byte counts, 0-100
    pub percentage: f64,
}

impl DownloadProgress {
    fn starting(model_id: &str, total_bytes: u64) -> Self {
        Self {
            model_id: model_id.to_string(),
            bytes_downloaded: 0,
            total_bytes,
            status: DownloadStatus::Starting,
            percentage: 0.0,
        }
    }
}

/// Percentage of `bytes` over `total`, clamped to 0-100; 0 when the total is unknown
pub fn percentage(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (bytes as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// The single load slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub loaded_model_id: Option<String>,
    pub is_loading_model: bool,
    pub is_unloading_model: bool,
}

/// Events broadcast to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    DownloadProgress(DownloadProgress),
    /// Emitted exactly once per download
    DownloadFinished {
        model_id: String,
        status: DownloadStatus,
    },
    ModelLoaded {
        model_id: String,
    },
    ModelUnloaded {
        model_id: Option<String>,
    },
    ErrorRecorded {
        model_id: String,
        message: String,
    },
    RegistryRefreshed {
        model_count: usize,
    },
}

/// Point-in-time copy of the whole store
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub downloads: Vec<DownloadProgress>,
    pub errors: BTreeMap<String, String>,
    pub lifecycle: LifecycleState,
    pub taken_at: DateTime<Utc>,
}

struct ProgressEntry {
    /// Identifies the download job that owns this entry
    job: u64,
    progress: DownloadProgress,
}

pub struct StateStore {
    progress: DashMap<String, ProgressEntry>,
    errors: DashMap<String, String>,
    lifecycle: RwLock<LifecycleState>,
    event_tx: broadcast::Sender<ManagerEvent>,
}

impl StateStore {
    pub fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));

        Self {
            progress: DashMap::new(),
            errors: DashMap::new(),
            lifecycle: RwLock::new(LifecycleState::default()),
            event_tx,
        }
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: ManagerEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    // ------------------------------------------------------------------
    // Download progress (written by the orchestrator only)
    // ------------------------------------------------------------------

    /// Publish a `starting` record for a new job and clear the model's last error
    pub(crate) fn begin_download(&self, model_id: &str, job: u64, total_bytes: u64) {
        self.clear_error(model_id);

        let progress = DownloadProgress::starting(model_id, total_bytes);
        self.progress.insert(
            model_id.to_string(),
            ProgressEntry {
                job,
                progress: progress.clone(),
            },
        );

        self.emit(ManagerEvent::DownloadProgress(progress));
    }

    /// Update bytes for a job. Ignored when `job` no longer owns the entry.
    pub(crate) fn update_progress(&self, model_id: &str, job: u64, bytes: u64, total: u64) -> bool {
        let updated = match self.progress.get_mut(model_id) {
            Some(mut entry) if entry.job == job => {
                let progress = &mut entry.progress;
                // Never report going backwards
                progress.bytes_downloaded = bytes.max(progress.bytes_downloaded);
                progress.total_bytes = total;
                progress.status = DownloadStatus::Downloading;
                progress.percentage = percentage(progress.bytes_downloaded, total);
                Some(progress.clone())
            }
            _ => None,
        };

        match updated {
            Some(progress) => {
                tracing::trace!(
                    model_id = %model_id,
                    bytes = progress.bytes_downloaded,
                    total = progress.total_bytes,
                    "Download progress"
                );
                self.emit(ManagerEvent::DownloadProgress(progress));
                true
            }
            None => false,
        }
    }

    /// Remove the job's progress entry and announce its terminal status.
    ///
    /// Returns false if the entry was already removed or belongs to another job.
    pub(crate) fn finish_download(&self, model_id: &str, job: u64, status: DownloadStatus) -> bool {
        let removed = self
            .progress
            .remove_if(model_id, |_, entry| entry.job == job)
            .is_some();

        if removed {
            self.emit(ManagerEvent::DownloadFinished {
                model_id: model_id.to_string(),
                status,
            });
        }
        removed
    }

    pub fn download_progress(&self, model_id: &str) -> Option<DownloadProgress> {
        self.progress.get(model_id).map(|e| e.progress.clone())
    }

    pub fn is_downloading(&self, model_id: &str) -> bool {
        self.progress.contains_key(model_id)
    }

    /// All in-flight downloads, sorted by model id
    pub fn downloads(&self) -> Vec<DownloadProgress> {
        let mut downloads: Vec<_> = self
            .progress
            .iter()
            .map(|e| e.progress.clone())
            .collect();
        downloads.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        downloads
    }

    // ------------------------------------------------------------------
    // Error map
    // ------------------------------------------------------------------

    /// Record an error for a model. Cancellation is never recorded.
    pub(crate) fn record_error(&self, model_id: &str, error: &ModelError) {
        if !error.is_user_visible() {
            return;
        }
        let message = error.to_string();
        tracing::warn!(model_id = %model_id, error = %message, "Model operation failed");
        self.errors.insert(model_id.to_string(), message.clone());
        self.emit(ManagerEvent::ErrorRecorded {
            model_id: model_id.to_string(),
            message,
        });
    }

    pub fn clear_error(&self, model_id: &str) {
        self.errors.remove(model_id);
    }

    pub fn last_error(&self, model_id: &str) -> Option<String> {
        self.errors.get(model_id).map(|e| e.value().clone())
    }

    pub fn errors(&self) -> BTreeMap<String, String> {
        self.errors
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Load slot (written by the lifecycle controller only)
    // ------------------------------------------------------------------

    fn lifecycle_read(&self) -> RwLockReadGuard<'_, LifecycleState> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle_write(&self) -> RwLockWriteGuard<'_, LifecycleState> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle_read().clone()
    }

    pub fn loaded_model_id(&self) -> Option<String> {
        self.lifecycle_read().loaded_model_id.clone()
    }

    /// Claim the loading flag. Returns false if a load is already in flight.
    pub(crate) fn try_begin_loading(&self) -> bool {
        let mut state = self.lifecycle_write();
        if state.is_loading_model {
            return false;
        }
        state.is_loading_model = true;
        true
    }

    /// Release the loading flag, recording the newly loaded model on success
    pub(crate) fn finish_loading(&self, loaded: Option<&str>) {
        {
            let mut state = self.lifecycle_write();
            state.is_loading_model = false;
            if let Some(model_id) = loaded {
                state.loaded_model_id = Some(model_id.to_string());
            }
        }

        if let Some(model_id) = loaded {
            self.emit(ManagerEvent::ModelLoaded {
                model_id: model_id.to_string(),
            });
        }
    }

    pub(crate) fn begin_unloading(&self) {
        self.lifecycle_write().is_unloading_model = true;
    }

    /// Clear the slot and the unloading flag
    pub(crate) fn finish_unloading(&self) {
        let previous = {
            let mut state = self.lifecycle_write();
            state.is_unloading_model = false;
            state.loaded_model_id.take()
        };
        self.emit(ManagerEvent::ModelUnloaded { model_id: previous });
    }

    /// Adopt the engine's view of the loaded model. Returns whether it changed.
    ///
    /// Callers hold the load slot, so no engine transition is in flight.
    pub(crate) fn reconcile_loaded(&self, engine_loaded: Option<String>) -> bool {
        let mut state = self.lifecycle_write();
        if state.loaded_model_id == engine_loaded {
            return false;
        }
        tracing::info!(
            previous = ?state.loaded_model_id,
            engine = ?engine_loaded,
            "Adopting loaded model reported by engine"
        );
        state.loaded_model_id = engine_loaded;
        true
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            downloads: self.downloads(),
            errors: self.errors(),
            lifecycle: self.lifecycle(),
            taken_at: Utc::now(),
        }
    }
}
