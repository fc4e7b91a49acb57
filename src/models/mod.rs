//! Model management module
//!
//! Provides functionality for:
//! - The model catalog (static fallback or supplied by the engine)
//! - Tracking which models are present in the models directory
//! - Downloading model files with progress and cancellation
//! - Atomically installing completed downloads
//! - Loading, unloading, deleting and importing models

pub mod catalog;
pub mod download;
pub mod installer;
pub mod lifecycle;
pub mod registry;

pub use catalog::{ModelDescriptor, ModelTier, default_model_id, static_catalog};
pub use download::DownloadOrchestrator;
pub use lifecycle::{LifecycleController, LoadOutcome};
pub use registry::{CatalogSource, ModelRegistry, ModelRuntimeInfo};
