//! Directory-backed test-case store
//!
//! Layout: `<root>/<problem id>/<case id>/in.txt` and `out.txt`. Every
//! subdirectory of a problem directory is one test case.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

/// Input file name inside a test-case directory
pub const INPUT_FILE: &str = "in.txt";

/// Expected output file name inside a test-case directory
pub const EXPECTED_FILE: &str = "out.txt";

#[derive(Debug, Error)]
pub enum TestcaseError {
    #[error("invalid problem id: {0:?}")]
    InvalidProblemId(String),

    #[error("problem directory {} not found", .0.display())]
    ProblemNotFound(PathBuf),

    #[error("failed to list test cases in {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One test case; contents stay on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Directory name of the case
    pub id: String,
    pub input: PathBuf,
    pub expected: PathBuf,
}

impl TestCase {
    fn from_dir(id: String, dir: &Path) -> Self {
        Self {
            id,
            input: dir.join(INPUT_FILE),
            expected: dir.join(EXPECTED_FILE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestcaseStore {
    root: PathBuf,
}

impl TestcaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the test cases of a problem
    pub fn problem_dir(&self, problem_id: &str) -> Result<PathBuf, TestcaseError> {
        let valid = !problem_id.is_empty()
            && problem_id != "."
            && problem_id != ".."
            && !problem_id.contains('/');
        if !valid {
            return Err(TestcaseError::InvalidProblemId(problem_id.to_string()));
        }
        Ok(self.root.join(problem_id))
    }

    /// List the test cases of a problem in lexicographic id order
    #[instrument(skip(self))]
    pub async fn list(&self, problem_id: &str) -> Result<Vec<TestCase>, TestcaseError> {
        let dir = self.problem_dir(problem_id)?;
        let io_err = |source: std::io::Error| TestcaseError::Io {
            path: dir.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TestcaseError::ProblemNotFound(dir.clone()));
            }
            Err(e) => return Err(io_err(e)),
        };

        let mut cases = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if !entry.file_type().await.map_err(io_err)?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            cases.push(TestCase::from_dir(id, &entry.path()));
        }
        cases.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(count = cases.len(), "listed test cases");
        Ok(cases)
    }
}
