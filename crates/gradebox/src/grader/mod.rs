//! Grading pipeline
//!
//! A [`Grader`] compiles a submission once when it is created and then grades
//! it against every test case of the problem, one case at a time:
//!
//! ```text
//! compile ─┬─ no artifact ──────────────────────────► [CompilationError]
//!          └─ artifact ─► for each case: run ─► classify ─► compare ─► record ─► publish
//! ```
//!
//! Limit violations and runtime errors always win over the output
//! comparison. Nothing that happens to a single test case stops the loop.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument, warn};

pub use crate::grader::job::GradingJob;
pub use crate::grader::verdict::{TestcaseResult, Verdict};
use crate::config::{Config, ConfigError, Toolchain};
use crate::progress::ProgressSink;
use crate::sandbox::Sandbox;
use crate::testcase::{TestcaseError, TestcaseStore};

mod compile;
mod execute;
mod job;
mod verdict;

/// Setup errors that prevent a grading run from taking place
#[derive(Debug, Error)]
pub enum GradeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("source file {} not found", .0.display())]
    SourceNotFound(PathBuf),

    #[error("source file {} is outside work directory {}", path.display(), work_dir.display())]
    SourceOutsideWorkDir { path: PathBuf, work_dir: PathBuf },

    #[error("failed to lock down artifact {}: {source}", path.display())]
    Lockdown {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Testcases(#[from] TestcaseError),
}

/// Grades one job against its problem's test cases
#[derive(Debug)]
pub struct Grader<S, P> {
    sandbox: S,
    progress: P,
    config: Config,
    toolchain: Toolchain,
    testcases: TestcaseStore,
    job: GradingJob,
    artifact: Option<PathBuf>,
    diagnostics: Option<String>,
}

/// Resolve the job's paths and check the source sits inside the work directory
async fn resolve_paths(job: &mut GradingJob) -> Result<(), GradeError> {
    if !(job.time_limit.is_finite() && job.time_limit > 0.0) {
        return Err(GradeError::InvalidJob(format!(
            "time limit must be positive, got {}",
            job.time_limit
        )));
    }
    if job.memory_limit == 0 {
        return Err(GradeError::InvalidJob(
            "memory limit must be positive".to_string(),
        ));
    }

    let work_dir = tokio::fs::canonicalize(&job.work_dir).await.map_err(|e| {
        GradeError::InvalidJob(format!(
            "work directory {}: {e}",
            job.work_dir.display()
        ))
    })?;
    let source = tokio::fs::canonicalize(&job.source)
        .await
        .map_err(|_| GradeError::SourceNotFound(job.source.clone()))?;

    if !source.starts_with(&work_dir) {
        return Err(GradeError::SourceOutsideWorkDir {
            path: source,
            work_dir,
        });
    }

    job.work_dir = work_dir;
    job.source = source;
    Ok(())
}

impl<S: Sandbox, P: ProgressSink> Grader<S, P> {
    /// Validate the job and compile its source
    ///
    /// A failed compilation is not an error: the grader is still returned
    /// and [`grade_all`](Self::grade_all) reports the compilation error.
    #[instrument(skip_all, fields(job_id = %job.id, toolchain = %job.toolchain))]
    pub async fn new(
        config: Config,
        sandbox: S,
        progress: P,
        mut job: GradingJob,
    ) -> Result<Self, GradeError> {
        let toolchain = config.get_toolchain(&job.toolchain)?.clone();
        resolve_paths(&mut job).await?;

        let (artifact, diagnostics) =
            match compile::compile(&sandbox, &config, &toolchain, &job).await? {
                compile::CompileOutcome::Compiled(path) => (Some(path), None),
                compile::CompileOutcome::Failed { diagnostics } => (None, diagnostics),
            };

        Ok(Self {
            sandbox,
            progress,
            testcases: TestcaseStore::new(&config.testcase_root),
            config,
            toolchain,
            job,
            artifact,
            diagnostics,
        })
    }

    /// Path of the compiled artifact, if compilation succeeded
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Compiler output of a failed compilation
    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    pub fn job(&self) -> &GradingJob {
        &self.job
    }

    /// Grade every test case in order
    ///
    /// Returns one result per test case, or a single compilation-error record
    /// when there is no artifact. Progress is published before the first
    /// case and after each one.
    #[instrument(skip_all, fields(job_id = %self.job.id, problem = %self.job.problem_id))]
    pub async fn grade_all(&mut self) -> Result<Vec<TestcaseResult>, GradeError> {
        let Some(exe_path) = self.artifact.clone() else {
            info!("no artifact, reporting compilation error");
            self.job
                .fail_compilation(TestcaseResult::compilation_error(self.diagnostics.clone()));
            return Ok(self.job.results().to_vec());
        };

        let cases = self.testcases.list(&self.job.problem_id).await?;
        self.job.start(cases.len());
        self.publish().await;

        for case in &cases {
            let result = execute::run_testcase(
                &self.sandbox,
                &self.config,
                &self.toolchain,
                &self.job,
                &exe_path,
                case,
            )
            .await;

            info!(case = %case.id, verdict = %result.verdict, "test case graded");
            self.job.record(result);
            self.publish().await;
        }

        let accepted = self
            .job
            .results()
            .iter()
            .filter(|r| r.verdict.is_accepted())
            .count();
        info!(accepted, total = cases.len(), "grading finished");

        Ok(self.job.results().to_vec())
    }

    async fn publish(&self) {
        let progress = self.job.progress();
        if let Err(e) = self.progress.publish(&self.job.id, progress).await {
            warn!(error = %e, %progress, "failed to publish progress");
        }
    }
}
