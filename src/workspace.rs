use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::queue::JobId;

/// Allocates and tears down per-job scratch directories under a single
/// root. Directories are mounted into the container at `/app` and must
/// never outlive their job.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, job_id: JobId) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Create the job's workspace. Idempotent.
    pub async fn allocate(&self, job_id: JobId) -> Result<PathBuf> {
        let path = self.path_for(job_id);
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Remove the job's workspace recursively. Called from the executor's
    /// cleanup path; errors are logged, never propagated.
    pub async fn remove(&self, job_id: JobId) {
        let path = self.path_for(job_id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, path = %path.display(), error = %e,
                    "Failed to remove workspace");
            }
        }
    }
}
