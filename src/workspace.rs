//! Directory helpers: output directories and the per-run working area.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

/// Create `path` and its parents if missing.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

/// Recursively remove `path`; a missing directory is not an error.
pub async fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove directory {}", path.display())),
    }
}

/// Isolated temporary directory holding per-page artifacts for one run.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("docs2pdf-")
            .tempdir()
            .context("Failed to create temporary working directory")?;
        debug!("Working directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the working area now.
    pub async fn remove(self) {
        let path = self.dir.keep();
        if let Err(e) = remove_dir(&path).await {
            warn!("{:#}", e);
        }
    }

    /// Leave the working area on disk and return its location.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_dir_creates_parents() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");

        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());

        ensure_dir(&nested).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_dir_tolerates_missing() {
        let root = tempfile::tempdir().unwrap();
        remove_dir(&root.path().join("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_workspace_remove_and_keep() {
        let workspace = Workspace::create().unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.is_dir());
        workspace.remove().await;
        assert!(!path.exists());

        let kept = Workspace::create().unwrap().keep();
        assert!(kept.is_dir());
        remove_dir(&kept).await.unwrap();
    }
}
