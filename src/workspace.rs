use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::Context as _;

use crate::error::OutriderResult;

/// Distinguishes workspaces created under the same base directory by rapid
/// successive jobs within one process.
static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// A disposable per-job directory. Every file the external tool may read or
/// write lives inside it; it is owned by exactly one job and deleted when that
/// job's result has been consumed or the job is cancelled.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `base`, qualified by pid, wall-clock
    /// nanos and an in-process counter so successive jobs never collide.
    pub fn create(base: &Path, prefix: &str) -> OutriderResult<Self> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = base.join(format!(
            "{prefix}_{}_{}_{}",
            std::process::id(),
            nanos,
            seq
        ));
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create workspace '{}'", root.display()))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of `name` inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write a file into the workspace, returning its full path.
    pub fn write_file(&self, name: &str, contents: &str) -> OutriderResult<PathBuf> {
        let path = self.file(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("write workspace file '{}'", path.display()))?;
        Ok(path)
    }

    /// Create a subdirectory inside the workspace, returning its full path.
    pub fn subdir(&self, name: &str) -> OutriderResult<PathBuf> {
        let path = self.file(name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("create workspace subdir '{}'", path.display()))?;
        Ok(path)
    }

    /// Remove the workspace tree. Idempotent: a workspace that is already
    /// gone is not an error.
    pub fn destroy(&self) -> OutriderResult<()> {
        destroy_path(&self.root)
    }
}

/// Remove a workspace directory tree, ignoring "already gone".
pub fn destroy_path(path: &Path) -> OutriderResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)
            .context(format!("remove workspace '{}'", path.display()))
            .into()),
    }
}
