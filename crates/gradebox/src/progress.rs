//! Job progress reporting
//!
//! The grader publishes a [`Progress`] snapshot after every test case. Sinks
//! decide where the snapshot goes; publishing is best effort and a failed
//! publish never stops grading.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("no progress recorded for job {0}")]
    NotFound(String),

    #[error("failed to encode progress: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Test cases finished out of the total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self { completed, total }
    }

    pub fn is_finished(&self) -> bool {
        self.completed >= self.total
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

/// Destination for progress snapshots, keyed by job id
pub trait ProgressSink {
    fn publish(
        &self,
        job_id: &str,
        progress: Progress,
    ) -> impl Future<Output = Result<(), ProgressError>> + Send;
}

impl<P: ProgressSink + Sync> ProgressSink for &P {
    fn publish(
        &self,
        job_id: &str,
        progress: Progress,
    ) -> impl Future<Output = Result<(), ProgressError>> + Send {
        (**self).publish(job_id, progress)
    }
}

/// Logs progress instead of storing it
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    async fn publish(&self, job_id: &str, progress: Progress) -> Result<(), ProgressError> {
        info!(job_id, %progress, "grading progress");
        Ok(())
    }
}

/// On-disk progress document
#[derive(Debug, Serialize, Deserialize)]
struct ProgressDocument {
    job_id: String,
    completed: usize,
    total: usize,
    /// `completed/total`
    progress: String,
}

/// Writes `<dir>/<job id>.json`, replacing the previous snapshot atomically
#[derive(Debug, Clone)]
pub struct FileProgressSink {
    dir: PathBuf,
}

impl FileProgressSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf, ProgressError> {
        let valid = !job_id.is_empty()
            && !job_id.starts_with('.')
            && !job_id.contains(['/', '\\']);
        if !valid {
            return Err(ProgressError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.dir.join(format!("{job_id}.json")))
    }

    /// Read the latest snapshot of a job
    pub async fn read(&self, job_id: &str) -> Result<Progress, ProgressError> {
        let path = self.path_for(job_id)?;
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProgressError::NotFound(job_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let document: ProgressDocument = serde_json::from_slice(&content)?;
        Ok(Progress::new(document.completed, document.total))
    }
}

impl ProgressSink for FileProgressSink {
    async fn publish(&self, job_id: &str, progress: Progress) -> Result<(), ProgressError> {
        let path = self.path_for(job_id)?;
        let document = ProgressDocument {
            job_id: job_id.to_string(),
            completed: progress.completed,
            total: progress.total,
            progress: progress.to_string(),
        };
        let json = serde_json::to_vec(&document)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{job_id}.json.tmp"));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(job_id, %progress, path = %path.display(), "progress written");
        Ok(())
    }
}
