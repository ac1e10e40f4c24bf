//! Argument builder for the `isolate` binary

use std::path::{Path, PathBuf};

use crate::types::{MountConfig, ResourceLimits};

/// One `isolate` invocation, rendered to an argument list by [`build`](Self::build)
///
/// Options other than the box id and cgroup flag only apply to
/// [`IsolateAction::Run`].
#[derive(Debug)]
pub struct IsolateCommand {
    isolate_path: PathBuf,
    action: IsolateAction,
    box_id: u32,
    cgroup: bool,
    limits: Option<ResourceLimits>,
    mounts: Vec<MountConfig>,
    env: Vec<(String, String)>,
    meta_file: Option<PathBuf>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    stderr_to_stdout: bool,
    working_dir: Option<String>,
    command: Vec<String>,
}

impl IsolateCommand {
    /// A `--run` on `box_id` with nothing else set
    pub fn new(isolate_path: impl Into<PathBuf>, box_id: u32) -> Self {
        Self {
            isolate_path: isolate_path.into(),
            action: IsolateAction::Run,
            box_id,
            cgroup: false,
            limits: None,
            mounts: Vec::new(),
            env: Vec::new(),
            meta_file: None,
            stdin: None,
            stdout: None,
            stderr: None,
            stderr_to_stdout: false,
            working_dir: None,
            command: Vec::new(),
        }
    }

    pub fn action(mut self, action: IsolateAction) -> Self {
        self.action = action;
        self
    }

    /// `--cg`, and memory limited through `--cg-mem` instead of `--mem`
    pub fn cgroup(mut self, enable: bool) -> Self {
        self.cgroup = enable;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountConfig>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Pass a variable into the box; order is preserved
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Host path isolate writes its meta report to
    pub fn meta_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta_file = Some(path.into());
        self
    }

    /// Redirections take paths as seen inside the box
    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    /// Merge stderr into stdout; overrides [`stderr`](Self::stderr)
    pub fn stderr_to_stdout(mut self, enable: bool) -> Self {
        self.stderr_to_stdout = enable;
        self
    }

    /// `--chdir` inside the box
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program and arguments, placed after `--`
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut args = vec![
            self.isolate_path.to_string_lossy().into_owned(),
            format!("--box-id={}", self.box_id),
        ];
        if self.cgroup {
            args.push("--cg".to_string());
        }

        match self.action {
            IsolateAction::Init => args.push("--init".to_string()),
            IsolateAction::Cleanup => args.push("--cleanup".to_string()),
            IsolateAction::Run => {
                args.push("--run".to_string());
                self.push_limits(&mut args);
                self.push_mounts(&mut args);
                self.push_process(&mut args);
                args.push("--".to_string());
                args.extend(self.command);
            }
        }
        args
    }

    fn push_limits(&self, args: &mut Vec<String>) {
        let Some(limits) = &self.limits else {
            return;
        };

        args.push(format!("--time={}", limits.time_limit));
        args.push(format!("--wall-time={}", limits.wall_time_limit));
        if !limits.memory_check_only {
            let flag = if self.cgroup { "--cg-mem" } else { "--mem" };
            args.push(format!("{flag}={}", limits.memory_limit));
        }
        args.push(format!("--stack={}", limits.stack_limit));
        args.push(format!("--fsize={}", limits.max_output));
        args.push(match limits.max_processes {
            Some(count) => format!("--processes={count}"),
            None => "--processes".to_string(),
        });
    }

    fn push_mounts(&self, args: &mut Vec<String>) {
        // An optional mount with no source is dropped rather than left to `:maybe`
        let present = self
            .mounts
            .iter()
            .filter(|m| !m.optional || Path::new(&m.source).exists());

        for mount in present {
            let rw = if mount.writable { ":rw" } else { "" };
            let maybe = if mount.optional { ":maybe" } else { "" };
            args.push(format!(
                "--dir={}={}{rw}{maybe}",
                mount.target, mount.source
            ));
        }
    }

    fn push_process(&self, args: &mut Vec<String>) {
        args.extend(self.env.iter().map(|(k, v)| format!("--env={k}={v}")));

        let paths = [
            ("--meta", &self.meta_file),
            ("--stdin", &self.stdin),
            ("--stdout", &self.stdout),
        ];
        for (flag, path) in paths {
            if let Some(path) = path {
                args.push(format!("{flag}={}", path.display()));
            }
        }

        if self.stderr_to_stdout {
            args.push("--stderr-to-stdout".to_string());
        } else if let Some(stderr) = &self.stderr {
            args.push(format!("--stderr={}", stderr.display()));
        }

        if let Some(dir) = &self.working_dir {
            args.push(format!("--chdir={dir}"));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateAction {
    Init,
    Run,
    Cleanup,
}
