use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Root directory under which every request gets its own sketch directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates the temp root if it does not exist yet.
    pub async fn ensure(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create temp root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Materializes the submitted code as `<root>/sketch_<id>/sketch_<id>.ino`.
    /// arduino-cli requires the .ino file name to match its directory name.
    pub async fn create_sketch(&self, code: &str) -> Result<SketchDir> {
        let name = format!("sketch_{}", Uuid::new_v4().simple());
        let dir = self.root.join(&name);

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create sketch directory {}", dir.display()))?;

        let ino_path = dir.join(format!("{name}.ino"));
        fs::write(&ino_path, code)
            .await
            .with_context(|| format!("failed to write sketch {}", ino_path.display()))?;

        debug!("Sketch materialized at {}", dir.display());
        Ok(SketchDir { dir })
    }
}

/// A per-request working directory holding one sketch and its build output.
#[derive(Debug)]
pub struct SketchDir {
    dir: PathBuf,
}

impl SketchDir {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Recursively deletes the directory. Failures are logged and swallowed;
    /// cleanup must never change the response already decided upon.
    pub async fn remove(self) {
        if let Err(e) = fs::remove_dir_all(&self.dir).await {
            warn!("Failed to clean up sketch directory {}: {}", self.dir.display(), e);
        }
    }
}
