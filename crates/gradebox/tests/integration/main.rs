//! Integration tests for gradebox
//!
//! Grading scenarios run against an in-process judge that stands in for the
//! sandbox, so they need nothing but a writable temp directory. Tests that
//! drive the real isolate binary are gated behind a feature and need root:
//!    cargo test -p gradebox --features integration-tests -- --include-ignored

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use gradebox::{
    Config, GradingJob, Identity, Sandbox, SandboxError, SandboxOutcome, SandboxRequest,
    SandboxResult, Telemetry,
};
use tempfile::TempDir;

mod grading;
#[cfg(feature = "integration-tests")]
mod isolate_backend;
mod meta_file_fixtures;

pub(crate) const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

pub(crate) fn fixture(path: &str) -> PathBuf {
    Path::new(FIXTURES_PATH).join(path)
}

/// Temp directory holding a work directory, progress and logs, with a
/// config pointing at the fixture problems
pub(crate) struct Workspace {
    pub dir: TempDir,
    pub config: Config,
    pub work_dir: PathBuf,
}

impl Workspace {
    /// Workspace whose runner identity is the current user so artifacts
    /// can be locked down without root
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_file(fixture("configs/valid_minimal.toml")).unwrap();

        let meta = std::fs::metadata(dir.path()).unwrap();
        config.runner_identity = Some(Identity::new(meta.uid(), meta.gid()));
        config.compiler_identity = Some(Identity::new(
            meta.uid().wrapping_add(1),
            meta.gid().wrapping_add(1),
        ));

        Self::with_config(dir, config)
    }

    pub(crate) fn with_config(dir: TempDir, mut config: Config) -> Self {
        config.testcase_root = fixture("problems");
        config.progress_dir = dir.path().join("progress");
        config.compiler_log = dir.path().join("logs/compile.log");
        config.runner_log = dir.path().join("logs/run.log");

        let work_dir = dir.path().join("work");
        std::fs::create_dir_all(&work_dir).unwrap();

        Self {
            dir,
            config,
            work_dir,
        }
    }

    /// Write `source` as the submission and describe a job grading it
    pub(crate) fn job(&self, job_id: &str, problem_id: &str, source: &str) -> GradingJob {
        let path = self.work_dir.join("main.c");
        std::fs::write(&path, source).unwrap();
        GradingJob::new(job_id, problem_id, "c", &self.work_dir, path)
    }
}

/// Sandbox double that "compiles" a source by copying it to the artifact
/// path and "runs" the artifact by interpreting its first word:
///
/// - `sum`: print the sum of the two input numbers
/// - `sum-padded`: same, with a trailing space and blank lines
/// - `sum-wrong`: print the sum plus one
/// - `spin`: print the right answer, then run out of time
/// - `hog`: print the right answer, then run out of memory
/// - `crash`: die from a signal
/// - `silent`: exit cleanly without writing anything
///
/// A source starting with `broken` fails to compile.
pub(crate) struct FakeJudge {
    compiler: Identity,
    requests: Mutex<Vec<SandboxRequest>>,
}

impl FakeJudge {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            compiler: config.compiler_identity(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<SandboxRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn compile(&self, request: &SandboxRequest) -> SandboxResult {
        // {src_path} -o {exe_path}
        let source = std::fs::read_to_string(&request.args[0]).unwrap();
        let output = request.stdout.as_ref().unwrap();

        if source.starts_with("broken") {
            std::fs::write(output, "main.c:2:12: error: expected ';' before '}' token\n").unwrap();
            return SandboxResult::new(SandboxOutcome::RuntimeError, telemetry(0.05, 1));
        }

        std::fs::write(&request.args[2], source).unwrap();
        SandboxResult::new(SandboxOutcome::Success, telemetry(0.2, 20480))
    }

    fn run(&self, request: &SandboxRequest) -> SandboxResult {
        let program = std::fs::read_to_string(&request.program).unwrap();
        let input = std::fs::read_to_string(request.stdin.as_ref().unwrap()).unwrap();
        let output = request.stdout.as_ref().unwrap();
        let sum: i64 = input
            .split_whitespace()
            .map(|n| n.parse::<i64>().unwrap())
            .sum();

        let limits = &request.limits;
        let (outcome, answer) = match program.split_whitespace().next().unwrap_or_default() {
            "sum" => (SandboxOutcome::Success, Some(format!("{sum}\n"))),
            "sum-padded" => (SandboxOutcome::Success, Some(format!("{sum} \n\n\n"))),
            "sum-wrong" => (SandboxOutcome::Success, Some(format!("{}\n", sum + 1))),
            "spin" => (SandboxOutcome::TimeLimitExceeded, Some(format!("{sum}\n"))),
            "hog" => (SandboxOutcome::MemoryLimitExceeded, Some(format!("{sum}\n"))),
            "crash" => (SandboxOutcome::RuntimeError, None),
            _ => (SandboxOutcome::Success, None),
        };

        if let Some(answer) = answer {
            std::fs::write(output, answer).unwrap();
        }

        let cpu_time = match outcome {
            SandboxOutcome::TimeLimitExceeded => limits.time_limit + 0.01,
            _ => 0.01,
        };
        let memory = match outcome {
            SandboxOutcome::MemoryLimitExceeded => limits.memory_limit + 1,
            _ => 1024,
        };
        SandboxResult::new(outcome, telemetry(cpu_time, memory))
    }
}

fn telemetry(cpu_time: f64, memory: u64) -> Telemetry {
    Telemetry {
        cpu_time,
        real_time: cpu_time * 1.5,
        memory,
        ..Telemetry::default()
    }
}

impl Sandbox for FakeJudge {
    async fn execute(&self, request: &SandboxRequest) -> Result<SandboxResult, SandboxError> {
        self.requests.lock().unwrap().push(request.clone());
        if request.identity == Some(self.compiler) {
            Ok(self.compile(request))
        } else {
            Ok(self.run(request))
        }
    }
}
