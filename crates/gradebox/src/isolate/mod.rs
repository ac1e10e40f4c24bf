//! IOI Isolate backend
//!
//! Implements [`Sandbox`] on top of Isolate. Every request gets a fresh box:
//! the box is initialized, the program runs with the request's work directory
//! bound at `/box`, and the box is cleaned up again.
//!
//! Isolate always runs the program as the user of its box (`first_uid + id`),
//! so a request's identity selects the box rather than being passed through.
//!
//! Flags and meta keys follow isolate(1): <https://www.ucw.cz/isolate/isolate.1.html>

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, warn};

pub use crate::isolate::command::{IsolateAction, IsolateCommand};
pub use crate::isolate::meta::{MetaFile, MetaParseError};
use crate::config::Config;
use crate::sandbox::{Sandbox, SandboxError, SandboxRequest};
use crate::types::{Identity, MountConfig, SandboxResult};

mod command;
mod meta;
mod process;

/// Where the request's work directory appears inside the box
const BOX_DIR: &str = "/box";

/// Where the directory holding an outside stdin file appears inside the box
const INPUT_DIR: &str = "/input";

const CGROUP_FS: &str = "/sys/fs/cgroup";

/// isolate's default `first_uid` and `first_gid`
pub const DEFAULT_FIRST_ID: u32 = 60000;

fn lists_memory(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|content| content.split_whitespace().any(|c| c == "memory"))
        .unwrap_or(false)
}

/// Create isolate's cgroup at `cg_root` with the memory and pids controllers
/// delegated to it
///
/// Does what `isolate-cg-keeper` does on a systemd host, for containers that
/// run without it. `Ok(false)` means cgroup v2 or its memory controller is
/// unavailable and memory must be limited through `RLIMIT_AS` instead.
pub fn prepare_cgroup(cg_root: &Path) -> Result<bool, SandboxError> {
    let base = Path::new(CGROUP_FS);
    if !lists_memory(&base.join("cgroup.controllers")) {
        return Ok(false);
    }
    if lists_memory(&cg_root.join("cgroup.subtree_control")) {
        debug!(cg_root = %cg_root.display(), "cgroup already delegated");
        return Ok(true);
    }

    // A cgroup with member processes cannot delegate controllers, so move
    // this process out of the root first
    let leaf = base.join("init");
    fs::create_dir_all(&leaf)?;
    fs::write(leaf.join("cgroup.procs"), std::process::id().to_string())?;
    fs::write(base.join("cgroup.subtree_control"), "+memory +pids")?;

    fs::create_dir_all(cg_root)?;
    fs::write(cg_root.join("cgroup.subtree_control"), "+memory +pids")?;
    Ok(true)
}

/// Fail on the first required mount whose host source is missing
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), SandboxError> {
    match mounts
        .iter()
        .find(|m| !m.optional && !Path::new(&m.source).exists())
    {
        Some(missing) => Err(SandboxError::MountSourceNotFound(missing.source.clone())),
        None => Ok(()),
    }
}

/// Turn a bare program name into an absolute path found through `PATH`
///
/// isolate execs the program without a `PATH` search. The result is
/// canonicalized since symlinks may point outside the bound directories.
pub fn resolve_command(program: &mut String) -> Result<(), SandboxError> {
    if program.contains('/') {
        return Ok(());
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    let found = std::env::split_paths(&search)
        .map(|dir| dir.join(program.as_str()))
        .find(|candidate| candidate.is_file());

    match found {
        Some(path) => {
            *program = fs::canonicalize(&path)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            Ok(())
        }
        None => Err(SandboxError::CommandFailed(format!(
            "command '{program}' not found in PATH"
        ))),
    }
}

/// Rewrite occurrences of the host directory `host` inside `arg` to `inside`
///
/// Only whole path components match, so `/work` is rewritten in `/work/a` and
/// `-d=/work` but not in `/work2` or `/srv/work`.
fn rebase(arg: &str, host: &str, inside: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.is_empty() {
        return arg.to_string();
    }

    let is_path_char = |c: char| c.is_alphanumeric() || matches!(c, '/' | '.' | '_' | '-');

    let mut out = String::with_capacity(arg.len());
    let mut last = 0;
    for (pos, _) in arg.match_indices(host) {
        let before = arg[..pos].chars().next_back();
        let after = &arg[pos + host.len()..];
        let starts_clean = before.is_none_or(|c| !is_path_char(c));
        let ends_clean = after.is_empty() || after.starts_with('/');
        if starts_clean && ends_clean {
            out.push_str(&arg[last..pos]);
            out.push_str(inside);
            last = pos + host.len();
        }
    }
    out.push_str(&arg[last..]);
    out
}

/// Map a host file under `work_dir` to its path inside the box
fn box_path(path: &Path, work_dir: &Path) -> Option<PathBuf> {
    path.strip_prefix(work_dir)
        .ok()
        .map(|rel| Path::new(BOX_DIR).join(rel))
}

/// Sandbox backend driving the `isolate` binary
#[derive(Debug, Clone)]
pub struct IsolateSandbox {
    isolate_path: PathBuf,
    box_id: u32,
    first_uid: u32,
    first_gid: u32,
    cgroup: bool,
    mounts: Vec<MountConfig>,
    profile_warned: Arc<AtomicBool>,
}

impl IsolateSandbox {
    /// Backend whose requests without an identity run in box `box_id`
    pub fn new(isolate_path: impl Into<PathBuf>, box_id: u32) -> Self {
        Self {
            isolate_path: isolate_path.into(),
            box_id,
            first_uid: DEFAULT_FIRST_ID,
            first_gid: DEFAULT_FIRST_ID,
            cgroup: false,
            mounts: Vec::new(),
            profile_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build a backend from the isolate settings of a configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.isolate_binary(), config.box_id)
            .first_ids(config.first_uid, config.first_gid)
            .cgroup(config.cgroup)
            .mounts(config.sandbox_mounts.iter().cloned())
    }

    /// isolate's `first_uid` and `first_gid`
    pub fn first_ids(mut self, uid: u32, gid: u32) -> Self {
        self.first_uid = uid;
        self.first_gid = gid;
        self
    }

    /// Enable cgroup support for memory limiting
    pub fn cgroup(mut self, enable: bool) -> Self {
        self.cgroup = enable;
        self
    }

    /// Add directory mounts applied to every invocation
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountConfig>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    /// The identity programs in box `box_id` run as
    pub fn box_user(&self, box_id: u32) -> Identity {
        Identity::new(
            self.first_uid.saturating_add(box_id),
            self.first_gid.saturating_add(box_id),
        )
    }

    /// Box whose user is `identity`, or the default box when there is none
    pub fn box_for(&self, identity: Option<Identity>) -> Result<u32, SandboxError> {
        let Some(identity) = identity else {
            return Ok(self.box_id);
        };
        identity
            .isolate_box(self.first_uid, self.first_gid)
            .ok_or(SandboxError::NotBoxUser {
                uid: identity.uid,
                gid: identity.gid,
            })
    }

    /// True the first time a syscall profile is dropped by this backend
    fn first_unapplied_profile(&self) -> bool {
        !self.profile_warned.swap(true, Ordering::Relaxed)
    }

    /// Translate a request into isolate `--run` arguments
    ///
    /// `work_dir` is the canonical host path bound at `/box`.
    fn run_args(
        &self,
        request: &SandboxRequest,
        box_id: u32,
        work_dir: &Path,
        meta_path: &Path,
    ) -> Result<Vec<String>, SandboxError> {
        let host = request.work_dir.to_string_lossy();

        let mut program = rebase(&request.program, &host, BOX_DIR);
        resolve_command(&mut program)?;
        let args = request.args.iter().map(|arg| rebase(arg, &host, BOX_DIR));

        let mut command = IsolateCommand::new(&self.isolate_path, box_id)
            .action(IsolateAction::Run)
            .cgroup(self.cgroup)
            .limits(request.limits.clone())
            .mount(MountConfig {
                source: work_dir.to_string_lossy().into_owned(),
                target: BOX_DIR.to_string(),
                writable: true,
                optional: false,
            })
            .mounts(self.mounts.iter().cloned())
            .meta_file(meta_path)
            .working_dir(BOX_DIR)
            .command(std::iter::once(program).chain(args));

        for (key, value) in &request.env {
            command = command.env(key, value);
        }

        if let Some(stdin) = &request.stdin {
            match box_path(stdin, &request.work_dir) {
                Some(inside) => command = command.stdin(inside),
                None => {
                    let (parent, name) = match (stdin.parent(), stdin.file_name()) {
                        (Some(parent), Some(name)) => (parent, name),
                        _ => {
                            return Err(SandboxError::InvalidPath(format!(
                                "stdin {} has no parent directory",
                                stdin.display()
                            )));
                        }
                    };
                    command = command
                        .mount(MountConfig {
                            source: parent.to_string_lossy().into_owned(),
                            target: INPUT_DIR.to_string(),
                            writable: false,
                            optional: false,
                        })
                        .stdin(Path::new(INPUT_DIR).join(name));
                }
            }
        }

        let inside = |path: &PathBuf| {
            box_path(path, &request.work_dir).ok_or_else(|| {
                SandboxError::InvalidPath(format!(
                    "{} is outside the work directory {}",
                    path.display(),
                    request.work_dir.display()
                ))
            })
        };

        if let Some(stdout) = &request.stdout {
            command = command.stdout(inside(stdout)?);
        }
        if let Some(stderr) = &request.stderr {
            if request.stdout.as_ref() == Some(stderr) {
                command = command.stderr_to_stdout(true);
            } else {
                command = command.stderr(inside(stderr)?);
            }
        }

        Ok(command.build())
    }

    #[instrument(skip(self, request), fields(program = %request.program))]
    async fn run(&self, request: &SandboxRequest) -> Result<SandboxResult, SandboxError> {
        if let Some(profile) = &request.seccomp_profile {
            if self.first_unapplied_profile() {
                warn!(profile, "isolate has no named syscall filters; profile not applied");
            } else {
                debug!(profile, "syscall profile not applied");
            }
        }

        let box_id = self.box_for(request.identity)?;
        validate_mounts(&self.mounts)?;
        let work_dir = tokio::fs::canonicalize(&request.work_dir).await?;
        let scratch = tempfile::tempdir()?;
        let meta_path = scratch.path().join("meta.txt");
        let args = self.run_args(request, box_id, &work_dir, &meta_path)?;

        process::init_box(&self.isolate_path, box_id, self.cgroup).await?;

        let outcome = process::run_isolate(&args, &meta_path).await;

        if let Err(e) = process::cleanup_box(&self.isolate_path, box_id, self.cgroup).await {
            warn!(box_id, error = %e, "box cleanup failed");
        }

        let (output, meta) = outcome?;

        if let Some(log_path) = &request.log_path
            && !output.stderr.is_empty()
        {
            let header = format!("# {}", request.command_line().join(" "));
            process::append_log(log_path, &header, &output.stderr).await;
        }

        let result = meta.to_sandbox_result(&request.limits);
        debug!(
            outcome = ?result.outcome,
            cpu_time = result.telemetry.cpu_time,
            memory = result.telemetry.memory,
            "sandbox run complete"
        );
        Ok(result)
    }
}

impl Sandbox for IsolateSandbox {
    async fn execute(&self, request: &SandboxRequest) -> Result<SandboxResult, SandboxError> {
        self.run(request).await
    }
}
