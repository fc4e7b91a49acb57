//! Atomic installation of completed downloads
//!
//! Temporary files live next to their destination so the final move is a
//! same-filesystem rename. Readers see either the previous file or the new
//! one, never a partially written destination.

use crate::error::{ModelError, ModelResult};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Suffix for in-progress downloads inside the models directory
const TEMP_SUFFIX: &str = "download";

/// Temporary path used while downloading to `dest`
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    dest.with_file_name(name)
}

/// Move `temp` into place at `dest`, replacing any existing file.
///
/// The installer does not inspect content; size validation happens at load
/// time. On failure the temporary file is removed and the destination is
/// left as it was.
pub async fn install(temp: &Path, dest: &Path) -> ModelResult<()> {
    let result = replace(temp, dest).await;

    match &result {
        Ok(()) => {
            tracing::info!(dest = ?dest, "Model file installed");
        }
        Err(e) => {
            tracing::error!(temp = ?temp, dest = ?dest, error = %e, "Model install failed");
            discard(temp).await;
        }
    }

    result
}

async fn replace(temp: &Path, dest: &Path) -> ModelResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ModelError::SaveFailed(e.to_string()))?;
    }

    if fs::metadata(dest).await.is_ok_and(|m| m.is_dir()) {
        return Err(ModelError::SaveFailed(format!(
            "{} is a directory",
            dest.display()
        )));
    }

    // rename() replaces an existing file atomically on POSIX. Platforms that
    // refuse to overwrite get remove-then-rename.
    let Err(first) = fs::rename(temp, dest).await else {
        return Ok(());
    };
    if !fs::try_exists(dest).await.unwrap_or(false) {
        return Err(ModelError::SaveFailed(first.to_string()));
    }

    tracing::debug!(dest = ?dest, error = %first, "Rename over existing file failed, removing first");
    fs::remove_file(dest)
        .await
        .map_err(|e| ModelError::SaveFailed(e.to_string()))?;
    fs::rename(temp, dest)
        .await
        .map_err(|e| ModelError::SaveFailed(e.to_string()))
}

/// Best-effort removal of a temporary download
pub async fn discard(temp: &Path) {
    match fs::remove_file(temp).await {
        Ok(()) => tracing::debug!(temp = ?temp, "Removed temporary download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(temp = ?temp, error = %e, "Failed to remove temporary download"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_for() {
        let dest = Path::new("/models/qwen.gguf");
        assert_eq!(temp_path_for(dest), PathBuf::from("/models/qwen.gguf.download"));
    }

    #[tokio::test]
    async fn test_install_new_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.gguf");
        let temp = temp_path_for(&dest);
        std::fs::write(&temp, b"new weights").unwrap();

        install(&temp, &dest).await.unwrap();

        assert!(!temp.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"new weights");
    }

    #[tokio::test]
    async fn test_install_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.gguf");
        let temp = temp_path_for(&dest);
        std::fs::write(&dest, b"old").unwrap();
        std::fs::write(&temp, b"replacement").unwrap();

        install(&temp, &dest).await.unwrap();

        assert!(!temp.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"replacement");
    }

    #[tokio::test]
    async fn test_install_creates_parent() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("staging.download");
        let dest = dir.path().join("nested/Models/model.gguf");
        std::fs::write(&temp, b"weights").unwrap();

        install(&temp, &dest).await.unwrap();
        assert!(dest.is_file());
    }

    #[tokio::test]
    async fn test_install_missing_temp_fails() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.gguf");
        let temp = temp_path_for(&dest);

        let err = install(&temp, &dest).await.unwrap_err();
        assert!(matches!(err, ModelError::SaveFailed(_)));
        assert!(err.to_string().starts_with("Failed to save model: "));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_install_onto_directory_fails_and_discards_temp() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.gguf");
        std::fs::create_dir(&dest).unwrap();
        let temp = temp_path_for(&dest);
        std::fs::write(&temp, b"weights").unwrap();

        let err = install(&temp, &dest).await.unwrap_err();
        assert!(matches!(err, ModelError::SaveFailed(_)));
        assert!(!temp.exists());
        assert!(dest.is_dir());
    }

    #[tokio::test]
    async fn test_discard_missing_is_silent() {
        let dir = TempDir::new().unwrap();
        discard(&dir.path().join("absent.download")).await;
    }
}
