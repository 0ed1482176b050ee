//! Scoped temporary storage for conversion jobs.
//!
//! The process backend needs real files to hand to the transcoding
//! executable. The store gives each job its own throwaway directory and
//! guarantees it disappears on every exit path: `release()` is explicit and
//! idempotent, and `Drop` acts as the backstop for error paths.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;
use uuid::Uuid;

/// Hands out per-job temporary directories.
///
/// Directories are uuid-prefixed so concurrent jobs can never collide.
#[derive(Debug, Default, Clone)]
pub struct ArtifactStore {
    /// Parent directory for job scratch space. `None` uses the system temp dir.
    root: Option<PathBuf>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place job directories under `root` instead of the system temp dir.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Acquire an isolated scratch directory for one job.
    pub fn acquire(&self, job_id: Uuid) -> io::Result<TemporaryArtifactHandle> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("wavebridge-{job_id}-");
        builder.prefix(&prefix);

        let dir = match &self.root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let path = dir.path().to_path_buf();
        Ok(TemporaryArtifactHandle {
            job_id,
            path,
            dir: Some(dir),
        })
    }
}

/// Ownership token over one job's scratch directory.
///
/// Releasing twice (or dropping after an explicit release) is a no-op, never
/// an error.
#[derive(Debug)]
pub struct TemporaryArtifactHandle {
    job_id: Uuid,
    path: PathBuf,
    dir: Option<TempDir>,
}

impl TemporaryArtifactHandle {
    /// Path of the scratch directory. Remains readable after release so
    /// callers can verify cleanup, but the directory itself is gone by then.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Delete the backing directory. Idempotent.
    pub fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(err) = dir.close() {
                // Cleanup failure must not mask the job outcome.
                warn!(job_id = %self.job_id, error = %err, "failed to remove job scratch directory");
            }
        }
    }
}

impl Drop for TemporaryArtifactHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_removes_directory_and_is_idempotent() -> anyhow::Result<()> {
        let store = ArtifactStore::new();
        let mut handle = store.acquire(Uuid::new_v4())?;
        let path = handle.path().to_path_buf();
        assert!(path.is_dir());

        handle.release();
        assert!(!path.exists());
        assert!(handle.is_released());

        // Second release is a no-op.
        handle.release();
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn drop_releases_unreleased_handles() -> anyhow::Result<()> {
        let store = ArtifactStore::new();
        let path = {
            let handle = store.acquire(Uuid::new_v4())?;
            handle.path().to_path_buf()
        };
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn with_root_places_directories_under_root() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ArtifactStore::with_root(root.path());
        let handle = store.acquire(Uuid::new_v4())?;
        assert!(handle.path().starts_with(root.path()));
        Ok(())
    }

    #[test]
    fn concurrent_jobs_get_distinct_directories() -> anyhow::Result<()> {
        let store = ArtifactStore::new();
        let a = store.acquire(Uuid::new_v4())?;
        let b = store.acquire(Uuid::new_v4())?;
        assert_ne!(a.path(), b.path());
        Ok(())
    }
}
