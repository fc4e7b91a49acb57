//! Concurrent model downloads
//!
//! One independent task per model id, no global limit. Each task streams the
//! response body into a temporary file beside the destination, publishing
//! progress to the [`StateStore`], then hands the file to the installer.
//!
//! Terminal cleanup happens exactly once: whoever removes the job's handle
//! from the in-flight map (the task finishing, or a cancel) owns the terminal
//! transition. A task whose handle is already gone only deletes its
//! temporary file. A completed transfer is installed before its handle is
//! removed, so a cancel or delete never interleaves with the rename.

use super::installer;
use super::registry::ModelRegistry;
use crate::config::ManagerConfig;
use crate::error::ModelError;
use crate::metrics;
use crate::state::{DownloadStatus, StateStore};
use anyhow::Context;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct DownloadHandle {
    job: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

enum TransferOutcome {
    Completed { bytes: u64 },
    Failed(String),
    Cancelled,
}

/// A transfer outcome after the task has taken back its handle
enum Settled {
    Installed { bytes: u64 },
    InstallFailed(ModelError),
    Failed(String),
    Cancelled,
}

/// Everything a download task needs, captured at start time
struct DownloadJob {
    model_id: String,
    job: u64,
    url: reqwest::Url,
    expected_bytes: u64,
    dest: PathBuf,
    temp: PathBuf,
}

pub struct DownloadOrchestrator {
    client: reqwest::Client,
    read_timeout: Duration,
    registry: Arc<ModelRegistry>,
    store: Arc<StateStore>,
    jobs: Mutex<HashMap<String, DownloadHandle>>,
    next_job: AtomicU64,
}

impl DownloadOrchestrator {
    /// Create an orchestrator with an HTTP client built from `config`
    pub fn new(
        config: &ManagerConfig,
        registry: Arc<ModelRegistry>,
        store: Arc<StateStore>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(
            client,
            config.read_timeout(),
            registry,
            store,
        ))
    }

    pub fn with_client(
        client: reqwest::Client,
        read_timeout: Duration,
        registry: Arc<ModelRegistry>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            client,
            read_timeout,
            registry,
            store,
            jobs: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(1),
        }
    }

    /// Start downloading a model.
    ///
    /// Returns false without side effects if the id is unknown, its URL is
    /// unusable, or a download for it is already in flight. On success a
    /// `starting` progress record is visible before this returns.
    pub async fn start_download(self: &Arc<Self>, model_id: &str) -> bool {
        let Some(model) = self.registry.by_id(model_id).await else {
            tracing::warn!(model_id = %model_id, "Cannot download unknown model");
            return false;
        };

        let url = match parse_download_url(&model.descriptor.download_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(model_id = %model_id, error = %e, "Cannot download model");
                return false;
            }
        };

        let dest = self.registry.models_dir().join(&model.descriptor.filename);

        let mut jobs = self.jobs.lock().await;

        // A finished transfer may still be installing after its handle is gone
        if jobs.contains_key(model_id) || self.store.is_downloading(model_id) {
            tracing::debug!(model_id = %model_id, "Download already in progress");
            return false;
        }

        let job = self.next_job.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        self.store
            .begin_download(model_id, job, model.descriptor.size_bytes);

        let download = DownloadJob {
            model_id: model_id.to_string(),
            job,
            url,
            expected_bytes: model.descriptor.size_bytes,
            temp: installer::temp_path_for(&dest),
            dest,
        };

        // The task cannot finish before its handle is inserted: it needs
        // `jobs` to claim itself.
        let task = tokio::spawn({
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            async move { this.run(download, cancel).await }
        });

        jobs.insert(
            model_id.to_string(),
            DownloadHandle {
                job,
                cancel,
                task: Some(task),
            },
        );

        tracing::info!(
            model_id = %model_id,
            job = job,
            active_downloads = jobs.len(),
            "Download started"
        );
        metrics::record_download_started(model_id);
        metrics::update_active_downloads(jobs.len());

        true
    }

    /// Cancel an in-flight download.
    ///
    /// Removes the progress record without recording an error, and waits for
    /// the task to delete its temporary file. Returns false if nothing was in
    /// flight.
    pub async fn cancel_download(&self, model_id: &str) -> bool {
        let handle = {
            let mut jobs = self.jobs.lock().await;
            let handle = jobs.remove(model_id);
            metrics::update_active_downloads(jobs.len());
            handle
        };

        match handle {
            Some(handle) => {
                self.cancel_handle(model_id, handle).await;
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight download. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let handles: Vec<(String, DownloadHandle)> = {
            let mut jobs = self.jobs.lock().await;
            let drained = jobs.drain().collect();
            metrics::update_active_downloads(0);
            drained
        };

        let count = handles.len();
        futures::future::join_all(
            handles
                .into_iter()
                .map(|(model_id, handle)| async move { self.cancel_handle(&model_id, handle).await }),
        )
        .await;

        if count > 0 {
            tracing::info!(count = count, "Cancelled all downloads");
        }
        count
    }

    /// Ids with a download in flight, sorted
    pub async fn active_downloads(&self) -> Vec<String> {
        let jobs = self.jobs.lock().await;
        let mut ids: Vec<_> = jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_active(&self, model_id: &str) -> bool {
        self.jobs.lock().await.contains_key(model_id)
    }

    async fn cancel_handle(&self, model_id: &str, mut handle: DownloadHandle) {
        handle.cancel.cancel();

        // The progress entry stays until the task has deleted its temporary
        // file, so a new download cannot start on top of it.
        if let Some(task) = handle.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(model_id = %model_id, error = %e, "Cancelled download task did not join cleanly");
        }

        self.store
            .finish_download(model_id, handle.job, DownloadStatus::Cancelled);

        tracing::info!(model_id = %model_id, job = handle.job, "Download cancelled");
        metrics::record_download_cancelled(model_id);
    }

    /// Remove our own handle from the in-flight map, installing a completed
    /// transfer while the map is still locked.
    ///
    /// `None` means a cancel got there first and owns the terminal transition.
    /// A cancel or delete that arrives during the install waits for it.
    async fn settle(&self, download: &DownloadJob, outcome: TransferOutcome) -> Option<Settled> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get(&download.model_id) {
            Some(handle) if handle.job == download.job => {}
            _ => return None,
        }

        let settled = match outcome {
            TransferOutcome::Completed { bytes } => {
                match installer::install(&download.temp, &download.dest).await {
                    Ok(()) => Settled::Installed { bytes },
                    Err(e) => Settled::InstallFailed(e),
                }
            }
            TransferOutcome::Failed(reason) => Settled::Failed(reason),
            TransferOutcome::Cancelled => Settled::Cancelled,
        };

        jobs.remove(&download.model_id);
        metrics::update_active_downloads(jobs.len());
        Some(settled)
    }

    async fn run(self: Arc<Self>, download: DownloadJob, cancel: CancellationToken) {
        let outcome = self.transfer(&download, &cancel).await;

        let Some(settled) = self.settle(&download, outcome).await else {
            installer::discard(&download.temp).await;
            return;
        };

        let DownloadJob {
            model_id, job, dest, temp, ..
        } = download;

        match settled {
            Settled::Installed { bytes } => {
                // Refresh before dropping the progress entry so observers never
                // see "no download, not downloaded, no error".
                self.registry.refresh().await;

                if self.registry.size_matches_expected(&model_id).await == Some(false) {
                    tracing::warn!(
                        model_id = %model_id,
                        bytes = bytes,
                        "Downloaded size differs from catalog estimate"
                    );
                }

                self.store
                    .finish_download(&model_id, job, DownloadStatus::Completed);
                tracing::info!(model_id = %model_id, bytes = bytes, dest = ?dest, "Download completed");
                metrics::record_download_completed(&model_id, bytes);
            }
            Settled::InstallFailed(e) => {
                // A failed replace may have removed the previous file
                self.registry.refresh().await;
                self.store.record_error(&model_id, &e);
                self.store
                    .finish_download(&model_id, job, DownloadStatus::Failed);
                metrics::record_download_failed(&model_id, "install");
            }
            Settled::Failed(reason) => {
                installer::discard(&temp).await;
                self.store
                    .record_error(&model_id, &ModelError::DownloadFailed(reason));
                self.store
                    .finish_download(&model_id, job, DownloadStatus::Failed);
                metrics::record_download_failed(&model_id, "transfer");
            }
            Settled::Cancelled => {
                // Only reachable if the token fired without a cancel call
                installer::discard(&temp).await;
                self.store
                    .finish_download(&model_id, job, DownloadStatus::Cancelled);
            }
        }
    }

    async fn transfer(&self, download: &DownloadJob, cancel: &CancellationToken) -> TransferOutcome {
        let DownloadJob {
            model_id,
            job,
            url,
            expected_bytes,
            temp,
            ..
        } = download;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TransferOutcome::Cancelled,
            response = self.client.get(url.clone()).send() => response,
        };

        let response = match response.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => return TransferOutcome::Failed(e.to_string()),
        };

        let content_length = response.content_length().filter(|&n| n > 0);
        let total = content_length.unwrap_or(*expected_bytes);

        tracing::debug!(
            model_id = %model_id,
            content_length = ?content_length,
            total = total,
            "Transfer response received"
        );

        if let Some(parent) = temp.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return TransferOutcome::Failed(format!("Failed to create models directory: {}", e));
        }

        let file = match tokio::fs::File::create(temp).await {
            Ok(f) => f,
            Err(e) => {
                return TransferOutcome::Failed(format!("Failed to create temporary file: {}", e));
            }
        };
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TransferOutcome::Cancelled,
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    return TransferOutcome::Failed(format!(
                        "no data received for {} seconds",
                        self.read_timeout.as_secs()
                    ));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return TransferOutcome::Failed(e.to_string()),
                Ok(Some(Ok(chunk))) => chunk,
            };

            if let Err(e) = writer.write_all(&chunk).await {
                return TransferOutcome::Failed(format!("Failed to write model data: {}", e));
            }
            downloaded += chunk.len() as u64;
            self.store.update_progress(model_id, *job, downloaded, total);
        }

        if let Some(expected) = content_length
            && downloaded < expected
        {
            return TransferOutcome::Failed(format!(
                "connection closed after {} of {} bytes",
                downloaded, expected
            ));
        }

        if let Err(e) = writer.flush().await {
            return TransferOutcome::Failed(format!("Failed to write model data: {}", e));
        }
        if let Err(e) = writer.into_inner().sync_all().await {
            return TransferOutcome::Failed(format!("Failed to sync model data: {}", e));
        }

        // The catalog size is only an estimate; report the real total at the end
        if total != downloaded {
            self.store.update_progress(model_id, *job, downloaded, downloaded);
        }

        TransferOutcome::Completed { bytes: downloaded }
    }
}

/// Parse a descriptor URL, accepting only http(s)
pub fn parse_download_url(raw: &str) -> Result<reqwest::Url, ModelError> {
    let url = reqwest::Url::parse(raw).map_err(|e| ModelError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "https" | "http" => Ok(url),
        scheme => Err(ModelError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            scheme
        ))),
    }
}
