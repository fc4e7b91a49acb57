//! Error taxonomy for model download and lifecycle operations
//!
//! The `Display` text of each variant is the message recorded in the per-model
//! error map, so it doubles as the user-facing string.

use thiserror::Error;

/// Result alias used across the crate
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors produced by registry, download, install and lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Unknown model id
    #[error("Model not found")]
    NotFound,

    /// Known model whose file has not been downloaded
    #[error("Model not downloaded")]
    NotDownloaded,

    /// Registry says downloaded, disk disagrees
    #[error("Model file not found on disk")]
    FileMissingOnDisk,

    /// File is below the minimum size floor
    #[error("Model file appears corrupted")]
    FileCorrupted,

    /// Descriptor has no usable download URL
    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),

    /// Transfer failed before completion
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Deliberate cancellation, never shown to the user
    #[error("Download cancelled")]
    Cancelled,

    /// Transfer succeeded but the install step did not
    #[error("Failed to save model: {0}")]
    SaveFailed(String),

    #[error("Import failed: {0}")]
    ImportFailed(String),

    /// Engine rejected the load; carries the engine's message verbatim
    #[error("{0}")]
    LoadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),
}

impl ModelError {
    /// Whether this error belongs in the error map.
    ///
    /// Cancellation is a user action and is never surfaced as an error.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
