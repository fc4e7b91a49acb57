//! Model Manager - download and lifecycle management for local inference models
//!
//! Downloads model files with progress and cancellation, installs them
//! atomically, and drives a single-slot inference engine through
//! load/unload transitions.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod state;

pub use config::ManagerConfig;
pub use engine::{InferenceEngine, InferencePreset};
pub use error::{ModelError, ModelResult};
pub use manager::ModelManager;
pub use models::{LoadOutcome, ModelDescriptor, ModelRuntimeInfo, ModelTier};
pub use state::{DownloadProgress, DownloadStatus, ManagerEvent, StateSnapshot, StateStore};
