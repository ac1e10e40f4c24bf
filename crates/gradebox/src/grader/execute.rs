//! Execution and verdict stage

use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::compare::outputs_match;
use crate::config::{Config, Toolchain};
use crate::grader::compile::{remove_if_exists, sandbox_env};
use crate::grader::job::GradingJob;
use crate::grader::verdict::{TestcaseResult, Verdict};
use crate::sandbox::{Sandbox, SandboxRequest};
use crate::testcase::TestCase;
use crate::types::ResourceLimits;

pub(crate) fn run_limits(
    config: &Config,
    toolchain: &Toolchain,
    job: &GradingJob,
) -> ResourceLimits {
    ResourceLimits::new(
        job.time_limit,
        config.wall_time_factor * job.time_limit,
        job.memory_limit,
    )
    .with_stack_limit(128 * ResourceLimits::MB)
    .with_max_output(16 * ResourceLimits::MB)
    .with_unbounded_processes()
    .with_memory_check_only(toolchain.run.memory_limit_check_only)
}

/// Run the artifact against one test case and judge it
///
/// Never fails: anything that goes wrong becomes the verdict of this case.
#[instrument(skip_all, fields(case = %case.id))]
pub(crate) async fn run_testcase<S: Sandbox>(
    sandbox: &S,
    config: &Config,
    toolchain: &Toolchain,
    job: &GradingJob,
    exe_path: &Path,
    case: &TestCase,
) -> TestcaseResult {
    let output_path = job.work_dir.join(format!("{}.txt", case.id));
    if let Err(e) = remove_if_exists(&output_path).await {
        warn!(path = %output_path.display(), error = %e, "failed to remove stale output");
    }

    let command = toolchain
        .run
        .expand_command(exe_path, &job.work_dir, job.memory_limit);
    let request = match SandboxRequest::new(command, &job.work_dir) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "cannot build run request");
            return TestcaseResult::new(&case.id, Verdict::SystemError, None);
        }
    };

    let mut request = request
        .limits(run_limits(config, toolchain, job))
        .stdin(&case.input)
        .output(&output_path)
        .seccomp_profile(toolchain.run.seccomp_profile.clone())
        .identity(config.runner_identity())
        .log_path(&config.runner_log);
    request.env = sandbox_env(&toolchain.run.env);

    let result = match sandbox.execute(&request).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "sandbox failed");
            return TestcaseResult::new(&case.id, Verdict::SystemError, None);
        }
    };

    debug!(
        outcome = ?result.outcome,
        cpu_time = result.telemetry.cpu_time,
        memory = result.telemetry.memory,
        "run finished"
    );

    let verdict = match Verdict::from_failure(result.outcome) {
        Some(verdict) => verdict,
        None => judge_output(&output_path, &case.expected).await,
    };

    TestcaseResult::new(&case.id, verdict, Some(result.telemetry))
}

async fn judge_output(output: &Path, expected: &Path) -> Verdict {
    if !tokio::fs::try_exists(output).await.unwrap_or(false) {
        debug!("no output produced");
        return Verdict::WrongAnswer;
    }
    if outputs_match(output, expected).await {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}
