use std::path::PathBuf;

use crate::grader::verdict::TestcaseResult;
use crate::progress::Progress;
use crate::types::ResourceLimits;

/// One submission being graded
///
/// The grader owns the job for the duration of a run. The work directory is
/// scratch space exclusive to this job; removing it afterwards is up to the
/// caller.
#[derive(Debug, Clone)]
pub struct GradingJob {
    /// Key progress is published under
    pub id: String,
    /// Source file, inside `work_dir`
    pub source: PathBuf,
    pub work_dir: PathBuf,
    pub problem_id: String,
    /// Toolchain id in the configuration
    pub toolchain: String,
    /// CPU time limit per test case in seconds
    pub time_limit: f64,
    /// Memory limit per test case in kilobytes
    pub memory_limit: u64,
    progress: Progress,
    results: Vec<TestcaseResult>,
}

impl GradingJob {
    pub fn new(
        id: impl Into<String>,
        problem_id: impl Into<String>,
        toolchain: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            work_dir: work_dir.into(),
            problem_id: problem_id.into(),
            toolchain: toolchain.into(),
            time_limit: 1.0,
            memory_limit: 256 * ResourceLimits::MB,
            progress: Progress::default(),
            results: Vec::new(),
        }
    }

    /// Set the CPU time limit in seconds
    pub fn time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = seconds;
        self
    }

    /// Set the memory limit in kilobytes
    pub fn memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = kb;
        self
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn results(&self) -> &[TestcaseResult] {
        &self.results
    }

    /// Reset for a run over `total` test cases
    pub(crate) fn start(&mut self, total: usize) {
        self.results.clear();
        self.progress = Progress::new(0, total);
    }

    /// Append a test-case result and count it as completed
    pub(crate) fn record(&mut self, result: TestcaseResult) {
        self.results.push(result);
        self.progress.completed += 1;
    }

    /// Replace all results with the single compilation-error record
    pub(crate) fn fail_compilation(&mut self, result: TestcaseResult) {
        self.results.clear();
        self.results.push(result);
        self.progress = Progress::default();
    }
}
