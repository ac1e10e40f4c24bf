//! Sandbox executor contract
//!
//! The grader never isolates processes itself. It describes one invocation as a
//! [`SandboxRequest`] and hands it to a [`Sandbox`] backend, which enforces the
//! limits and reports a classified [`SandboxResult`].

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Identity, ResourceLimits, SandboxResult};

/// Errors raised when a sandbox backend cannot carry out an invocation at all
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to initialize box {id}: {message}")]
    InitFailed { id: u32, message: String },

    #[error("failed to cleanup box {id}: {message}")]
    CleanupFailed { id: u32, message: String },

    #[error("sandbox command failed: {0}")]
    CommandFailed(String),

    #[error("failed to spawn sandbox process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("failed to parse meta file: {0}")]
    MetaParseFailed(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{uid}:{gid} is not the user of any isolate box")]
    NotBoxUser { uid: u32, gid: u32 },

    #[error("mount source path does not exist: {0}")]
    MountSourceNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs one program under hard limits
pub trait Sandbox {
    /// Execute the request, blocking the caller's task until the process has
    /// terminated or been killed
    fn execute(
        &self,
        request: &SandboxRequest,
    ) -> impl Future<Output = Result<SandboxResult, SandboxError>> + Send;
}

impl<S: Sandbox + Sync> Sandbox for &S {
    fn execute(
        &self,
        request: &SandboxRequest,
    ) -> impl Future<Output = Result<SandboxResult, SandboxError>> + Send {
        (**self).execute(request)
    }
}

/// One sandboxed invocation
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Program to execute
    pub program: String,
    pub args: Vec<String>,
    /// Environment, applied in order
    pub env: Vec<(String, String)>,
    pub limits: ResourceLimits,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Named syscall filter; `None` disables filtering
    pub seccomp_profile: Option<String>,
    pub identity: Option<Identity>,
    /// Diagnostic log the backend may append to
    pub log_path: Option<PathBuf>,
    /// Scratch directory the program runs in
    pub work_dir: PathBuf,
}

impl SandboxRequest {
    /// Build a request from a program-plus-arguments vector
    pub fn new(
        command: Vec<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self, SandboxError> {
        let mut command = command.into_iter();
        let program = command.next().ok_or(SandboxError::EmptyCommand)?;

        Ok(Self {
            program,
            args: command.collect(),
            env: Vec::new(),
            limits: ResourceLimits::default(),
            stdin: None,
            stdout: None,
            stderr: None,
            seccomp_profile: None,
            identity: None,
            log_path: None,
            work_dir: work_dir.into(),
        })
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set stdin file path
    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Send both stdout and stderr to one file
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.stdout = Some(path.clone());
        self.stderr = Some(path);
        self
    }

    pub fn seccomp_profile(mut self, profile: Option<String>) -> Self {
        self.seccomp_profile = profile;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// The full command line, program first
    pub fn command_line(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}
