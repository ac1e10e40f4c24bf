//! Process spawning for Isolate
//!
//! Runs the isolate binary for box setup, execution and teardown.

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::isolate::command::{IsolateAction, IsolateCommand};
use crate::isolate::meta::MetaFile;
use crate::sandbox::SandboxError;

async fn spawn(args: &[String]) -> Result<Output, SandboxError> {
    let program = args
        .first()
        .ok_or_else(|| SandboxError::CommandFailed("empty command arguments".to_string()))?;

    Command::new(program)
        .args(&args[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(SandboxError::SpawnFailed)
}

/// Initialize a box
pub(crate) async fn init_box(
    isolate_path: &Path,
    box_id: u32,
    cgroup: bool,
) -> Result<(), SandboxError> {
    let args = IsolateCommand::new(isolate_path, box_id)
        .action(IsolateAction::Init)
        .cgroup(cgroup)
        .build();

    debug!(?args, "initializing isolate box");
    let output = spawn(&args).await?;

    if !output.status.success() {
        return Err(SandboxError::InitFailed {
            id: box_id,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!(box_dir = %String::from_utf8_lossy(&output.stdout).trim(), "box initialized");
    Ok(())
}

/// Tear a box down
pub(crate) async fn cleanup_box(
    isolate_path: &Path,
    box_id: u32,
    cgroup: bool,
) -> Result<(), SandboxError> {
    let args = IsolateCommand::new(isolate_path, box_id)
        .action(IsolateAction::Cleanup)
        .cgroup(cgroup)
        .build();

    debug!(?args, "cleaning up isolate box");
    let output = spawn(&args).await?;

    if !output.status.success() {
        return Err(SandboxError::CleanupFailed {
            id: box_id,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Run an isolate command and parse the meta file it leaves behind
///
/// A missing meta file means isolate never got as far as running the
/// program.
pub(crate) async fn run_isolate(
    args: &[String],
    meta_path: &Path,
) -> Result<(Output, MetaFile), SandboxError> {
    debug!(?args, "running isolate command");
    let output = spawn(args).await?;

    if !tokio::fs::try_exists(meta_path).await.unwrap_or(false) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SandboxError::CommandFailed(stderr.trim().to_string()));
    }

    let meta = MetaFile::load(meta_path).await?;
    Ok((output, meta))
}

/// Append isolate's own diagnostics to a log file
///
/// Logging is best effort; failures are reported and swallowed.
pub(crate) async fn append_log(log_path: &Path, header: &str, body: &[u8]) {
    let result = async {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await?;
        file.write_all(header.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.write_all(body).await?;
        if !body.ends_with(b"\n") {
            file.write_all(b"\n").await?;
        }
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        warn!(path = %log_path.display(), error = %e, "failed to append sandbox log");
    }
}
