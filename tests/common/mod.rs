//! Common test fixtures: a recording inference engine and a local HTTP server

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::Path as UrlPath;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use model_manager::state::ManagerEvent;
use model_manager::{
    DownloadStatus, InferenceEngine, InferencePreset, ManagerConfig, ModelDescriptor, ModelManager,
    ModelTier,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Size used for model files that must pass load validation
pub const VALID_MODEL_SIZE: u64 = 150_000_000;

// =============================================================================
// Mock engine
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Load(String),
    Unload,
    Delete(String),
    Import(String),
    SetPreset(InferencePreset),
}

/// Engine that records every call and keeps its own loaded-model slot
pub struct MockEngine {
    models_dir: PathBuf,
    catalog: Mutex<Vec<ModelDescriptor>>,
    loaded: Mutex<Option<String>>,
    calls: Mutex<Vec<EngineCall>>,
    load_failures: Mutex<HashMap<String, String>>,
    load_delay: Mutex<Duration>,
    loaded_query_delay: Mutex<Duration>,
    native_delete: AtomicBool,
}

impl MockEngine {
    pub fn new(models_dir: PathBuf, catalog: Vec<ModelDescriptor>) -> Self {
        Self {
            models_dir,
            catalog: Mutex::new(catalog),
            loaded: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            load_failures: Mutex::new(HashMap::new()),
            load_delay: Mutex::new(Duration::ZERO),
            loaded_query_delay: Mutex::new(Duration::ZERO),
            native_delete: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Only load/unload/delete calls, in order
    pub fn slot_calls(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, EngineCall::SetPreset(_)))
            .collect()
    }

    pub fn load_count(&self, model_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == EngineCall::Load(model_id.to_string()))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_load(&self, model_id: &str, message: &str) {
        self.load_failures
            .lock()
            .unwrap()
            .insert(model_id.to_string(), message.to_string());
    }

    pub fn allow_load(&self, model_id: &str) {
        self.load_failures.lock().unwrap().remove(model_id);
    }

    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock().unwrap() = delay;
    }

    /// Answer loaded-model queries late, with the value read before the delay
    pub fn set_loaded_query_delay(&self, delay: Duration) {
        *self.loaded_query_delay.lock().unwrap() = delay;
    }

    pub fn set_native_delete(&self, enabled: bool) {
        self.native_delete.store(enabled, Ordering::SeqCst);
    }

    /// Pretend the engine loaded a model on its own
    pub fn set_loaded(&self, model_id: Option<&str>) {
        *self.loaded.lock().unwrap() = model_id.map(str::to_string);
    }

    pub fn set_catalog(&self, catalog: Vec<ModelDescriptor>) {
        *self.catalog.lock().unwrap() = catalog;
    }

    fn filename(&self, model_id: &str) -> Option<String> {
        self.catalog
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == model_id)
            .map(|d| d.filename.clone())
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn available_models(&self) -> Vec<ModelDescriptor> {
        self.catalog.lock().unwrap().clone()
    }

    async fn loaded_model_id(&self) -> String {
        let loaded = self.loaded.lock().unwrap().clone().unwrap_or_default();

        let delay = *self.loaded_query_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        loaded
    }

    async fn load_model(&self, model_id: &str) -> Result<(), String> {
        self.record(EngineCall::Load(model_id.to_string()));

        let delay = *self.load_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.load_failures.lock().unwrap().get(model_id) {
            return Err(message.clone());
        }
        *self.loaded.lock().unwrap() = Some(model_id.to_string());
        Ok(())
    }

    async fn unload_model(&self) {
        self.record(EngineCall::Unload);
        *self.loaded.lock().unwrap() = None;
    }

    async fn is_model_loaded(&self) -> bool {
        self.loaded.lock().unwrap().is_some()
    }

    async fn delete_model(&self, model_id: &str) -> bool {
        self.record(EngineCall::Delete(model_id.to_string()));

        if !self.native_delete.load(Ordering::SeqCst) {
            return false;
        }
        match self.filename(model_id) {
            Some(filename) => std::fs::remove_file(self.models_dir.join(filename)).is_ok(),
            None => false,
        }
    }

    async fn import_model(&self, model_id: &str, source_path: &Path) -> bool {
        self.record(EngineCall::Import(model_id.to_string()));

        match self.filename(model_id) {
            Some(filename) => std::fs::copy(source_path, self.models_dir.join(filename)).is_ok(),
            None => false,
        }
    }

    fn models_directory(&self) -> PathBuf {
        self.models_dir.clone()
    }

    async fn set_inference_preset(&self, preset: InferencePreset) {
        self.record(EngineCall::SetPreset(preset));
    }
}

// =============================================================================
// Local file server
// =============================================================================

/// Chunk size for streamed responses
pub const CHUNK_SIZE: usize = 100_000;

async fn fixed(UrlPath(size): UrlPath<usize>) -> impl IntoResponse {
    vec![7u8; size]
}

/// Ten paced chunks without a Content-Length header
async fn chunked(UrlPath(chunks): UrlPath<usize>) -> impl IntoResponse {
    let stream = async_stream::stream! {
        for _ in 0..chunks {
            tokio::time::sleep(Duration::from_millis(20)).await;
            yield Ok::<_, std::io::Error>(Bytes::from(vec![7u8; CHUNK_SIZE]));
        }
    };
    Body::from_stream(stream)
}

/// One chunk, then silence forever
async fn stall() -> impl IntoResponse {
    let stream = async_stream::stream! {
        yield Ok::<_, std::io::Error>(Bytes::from(vec![7u8; CHUNK_SIZE]));
        std::future::pending::<()>().await;
    };
    Body::from_stream(stream)
}

async fn broken() -> impl IntoResponse {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Serve test routes on an ephemeral port, returning the base URL
pub async fn spawn_file_server() -> String {
    let app = Router::new()
        .route("/fixed/{size}", get(fixed))
        .route("/chunked/{chunks}", get(chunked))
        .route("/stall", get(stall))
        .route("/error", get(broken));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to read local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    format!("http://{}", addr)
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn descriptor(id: &str, download_url: &str, size_bytes: u64) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        name: format!("Test {}", id),
        vendor: "test".to_string(),
        filename: format!("{}.gguf", id),
        download_url: download_url.to_string(),
        size_bytes,
        context_length: 4096,
        speed_rating: 5.0,
        quality_rating: 5.0,
        languages: vec!["en".to_string()],
        description: String::new(),
        tier: ModelTier::Custom,
        is_default: false,
    }
}

pub struct Harness {
    pub manager: ModelManager,
    pub engine: Arc<MockEngine>,
    pub dir: TempDir,
}

impl Harness {
    pub fn models_dir(&self) -> PathBuf {
        self.dir.path().join("Models")
    }

    pub fn model_file(&self, model_id: &str) -> PathBuf {
        self.models_dir().join(format!("{}.gguf", model_id))
    }

    pub fn temp_file(&self, model_id: &str) -> PathBuf {
        self.models_dir().join(format!("{}.gguf.download", model_id))
    }

    /// Create a sparse model file of `len` bytes
    pub fn write_model_file(&self, model_id: &str, len: u64) {
        std::fs::create_dir_all(self.models_dir()).unwrap();
        let file = std::fs::File::create(self.model_file(model_id)).unwrap();
        file.set_len(len).unwrap();
    }
}

pub async fn harness(catalog: Vec<ModelDescriptor>) -> Harness {
    harness_with(catalog, |_| {}).await
}

pub async fn harness_with(
    catalog: Vec<ModelDescriptor>,
    configure: impl FnOnce(&mut ManagerConfig),
) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = ManagerConfig {
        app_support_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    configure(&mut config);

    let engine = Arc::new(MockEngine::new(config.models_dir(), catalog));
    let manager = ModelManager::new(config, engine.clone())
        .await
        .expect("Failed to create manager");

    Harness {
        manager,
        engine,
        dir,
    }
}

/// Wait for the terminal event of `model_id`'s download
pub async fn wait_for_finish(
    rx: &mut broadcast::Receiver<ManagerEvent>,
    model_id: &str,
) -> DownloadStatus {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ManagerEvent::DownloadFinished { model_id: id, status }) if id == model_id => {
                    return status;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("Timed out waiting for download to finish")
}

/// Poll until `condition` holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("Timed out waiting for condition");
}
