//! Compilation stage
//!
//! Builds the submission once inside the sandbox and locks the artifact down
//! so the submission's run-time identity may execute it but nobody may
//! modify it.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, Toolchain};
use crate::grader::GradeError;
use crate::grader::job::GradingJob;
use crate::sandbox::{Sandbox, SandboxRequest};
use crate::types::{Identity, ResourceLimits};

/// Scratch file in the work directory that collects compiler output
pub(crate) const DIAGNOSTICS_FILE: &str = "compiler.out";

/// Most compiler output kept on a compilation-error record
pub(crate) const MAX_DIAGNOSTICS: u64 = 64 * 1024;

/// Largest file a compiler may write, in kilobytes
///
/// Applies to the artifact as well as the diagnostics, which are truncated
/// on read instead.
const MAX_COMPILE_FILE: u64 = 512 * ResourceLimits::MB;

/// Result of the compilation stage
#[derive(Debug)]
pub(crate) enum CompileOutcome {
    /// Path of the locked-down artifact, which may not exist for
    /// interpreted and JVM targets
    Compiled(PathBuf),
    Failed { diagnostics: Option<String> },
}

fn compile_limits(toolchain: &Toolchain) -> ResourceLimits {
    let compile = &toolchain.compile;
    ResourceLimits::new(
        compile.time_limit,
        compile.wall_time_limit,
        compile.memory_limit,
    )
    .with_stack_limit(128 * ResourceLimits::MB)
    .with_max_output(MAX_COMPILE_FILE)
    .with_unbounded_processes()
}

/// Host `PATH` first, then the given variables in order
pub(crate) fn sandbox_env<'a>(
    extra: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Vec<(String, String)> {
    std::env::var("PATH")
        .ok()
        .map(|path| ("PATH".to_string(), path))
        .into_iter()
        .chain(extra.into_iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect()
}

/// Remove a file, treating "already gone" as success
pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn read_diagnostics(path: &Path) -> Option<String> {
    let file = tokio::fs::File::open(path).await.ok()?;
    let mut buf = Vec::new();
    if let Err(e) = file.take(MAX_DIAGNOSTICS).read_to_end(&mut buf).await {
        warn!(path = %path.display(), error = %e, "failed to read compiler output");
        return None;
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Hand the artifact to `owner` with mode 0500
///
/// A missing artifact is not an error: some toolchains never produce a file
/// at the artifact path.
pub(crate) async fn lock_down(path: &Path, owner: Identity) -> Result<bool, GradeError> {
    let lockdown_err = |source| GradeError::Lockdown {
        path: path.to_path_buf(),
        source,
    };

    if !tokio::fs::try_exists(path).await.map_err(lockdown_err)? {
        debug!(path = %path.display(), "no artifact on disk, nothing to lock down");
        return Ok(false);
    }

    std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid)).map_err(lockdown_err)?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o500))
        .await
        .map_err(lockdown_err)?;

    debug!(path = %path.display(), uid = owner.uid, gid = owner.gid, "artifact locked down");
    Ok(true)
}

/// Compile the job's source
///
/// Every failure to produce an artifact, including a failed sandbox call, is
/// reported as [`CompileOutcome::Failed`]. Only a failed lockdown of an
/// existing artifact is an error.
#[instrument(skip_all, fields(job_id = %job.id, toolchain = %job.toolchain))]
pub(crate) async fn compile<S: Sandbox>(
    sandbox: &S,
    config: &Config,
    toolchain: &Toolchain,
    job: &GradingJob,
) -> Result<CompileOutcome, GradeError> {
    let exe_dir = job.work_dir.as_path();
    let exe_path = exe_dir.join(&toolchain.compile.exe_name);
    let diagnostics_path = exe_dir.join(DIAGNOSTICS_FILE);

    let command = toolchain
        .compile
        .expand_command(&job.source, exe_dir, &exe_path);

    let request = match SandboxRequest::new(command, exe_dir) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "cannot build compile request");
            return Ok(CompileOutcome::Failed {
                diagnostics: Some(e.to_string()),
            });
        }
    };

    let mut request = request
        .limits(compile_limits(toolchain))
        .output(&diagnostics_path)
        .seccomp_profile(None)
        .identity(config.compiler_identity())
        .log_path(&config.compiler_log);
    request.env = sandbox_env(&toolchain.compile.env);

    if let Err(e) = remove_if_exists(&diagnostics_path).await {
        warn!(error = %e, "failed to clear stale compiler output");
    }

    debug!(command = ?request.command_line(), "compiling");
    let result = sandbox.execute(&request).await;

    let diagnostics = read_diagnostics(&diagnostics_path).await;
    if let Err(e) = remove_if_exists(&diagnostics_path).await {
        warn!(error = %e, "failed to remove compiler output");
    }

    match result {
        Ok(result) if result.is_success() => {
            lock_down(&exe_path, config.runner_identity()).await?;
            info!(
                cpu_time = result.telemetry.cpu_time,
                memory = result.telemetry.memory,
                "compilation succeeded"
            );
            Ok(CompileOutcome::Compiled(exe_path))
        }
        Ok(result) => {
            info!(outcome = ?result.outcome, "compilation failed");
            let diagnostics = diagnostics
                .filter(|d| !d.trim().is_empty())
                .or(result.message);
            Ok(CompileOutcome::Failed { diagnostics })
        }
        Err(e) => {
            warn!(error = %e, "sandbox failed during compilation");
            Ok(CompileOutcome::Failed {
                diagnostics: Some(format!("sandbox error: {e}")),
            })
        }
    }
}
