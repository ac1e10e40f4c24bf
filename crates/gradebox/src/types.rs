use serde::{Deserialize, Serialize};

/// Hard ceilings handed to the sandbox for a single invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    pub time_limit: f64,

    /// Wall clock time limit in seconds
    pub wall_time_limit: f64,

    /// Memory limit in kilobytes
    pub memory_limit: u64,

    /// Stack size limit in kilobytes
    pub stack_limit: u64,

    /// Maximum size of any file the program writes, in kilobytes
    pub max_output: u64,

    /// Maximum number of processes/threads (`None` means unbounded)
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Measure memory against `memory_limit` without enforcing it
    #[serde(default)]
    pub memory_check_only: bool,
}

impl ResourceLimits {
    /// One megabyte, in the kilobyte unit every limit uses
    pub const MB: u64 = 1024;

    /// Create limits with the given time and memory ceilings and default
    /// stack, output and process limits
    pub fn new(time_limit: f64, wall_time_limit: f64, memory_limit: u64) -> Self {
        Self {
            time_limit,
            wall_time_limit,
            memory_limit,
            ..Default::default()
        }
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = kb;
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = kb;
        self
    }

    /// Cap the number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Allow any number of processes
    pub fn with_unbounded_processes(mut self) -> Self {
        self.max_processes = None;
        self
    }

    /// Only measure memory usage, judging it after the fact
    pub fn with_memory_check_only(mut self, enabled: bool) -> Self {
        self.memory_check_only = enabled;
        self
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: 2.0,
            wall_time_limit: 4.0,
            memory_limit: 256 * Self::MB,
            stack_limit: 128 * Self::MB,
            max_output: 16 * Self::MB,
            max_processes: Some(1),
            memory_check_only: false,
        }
    }
}

/// User and group a sandboxed process acts as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// The isolate box this is the user of, given isolate's `first_uid` and
    /// `first_gid`
    pub fn isolate_box(self, first_uid: u32, first_gid: u32) -> Option<u32> {
        let offset = self.uid.checked_sub(first_uid)?;
        (self.gid.checked_sub(first_gid) == Some(offset)).then_some(offset)
    }
}

/// Classified outcome of a sandboxed invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxOutcome {
    /// Exited with code 0 within every limit
    Success,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    /// Non-zero exit, fatal signal or output limit
    RuntimeError,
    /// The sandbox itself failed
    SystemError,
}

impl SandboxOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, SandboxOutcome::Success)
    }
}

/// Measured resource usage of a sandboxed process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// CPU time used in seconds
    pub cpu_time: f64,

    /// Wall clock time used in seconds
    pub real_time: f64,

    /// Peak memory usage in kilobytes
    pub memory: u64,

    /// Exit code if the program exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the program was killed by a signal
    pub signal: Option<i32>,
}

/// Result returned by a sandbox backend
#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub outcome: SandboxOutcome,

    pub telemetry: Telemetry,

    /// Backend-specific detail (e.g. isolate's meta `message`)
    pub message: Option<String>,
}

impl SandboxResult {
    pub fn new(outcome: SandboxOutcome, telemetry: Telemetry) -> Self {
        Self {
            outcome,
            telemetry,
            message: None,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Two-letter `status` code of an isolate meta file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "OK")]
    Ok,
    /// Non-zero exit code
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "TO")]
    TimeLimitExceeded,
    #[serde(rename = "SG")]
    Signaled,
    /// Isolate failed; also any code this crate does not know
    #[serde(rename = "XX")]
    InternalError,
}

impl ExecutionStatus {
    pub fn from_isolate_status(status: &str) -> Self {
        match status {
            "OK" => Self::Ok,
            "RE" => Self::RuntimeError,
            "TO" => Self::TimeLimitExceeded,
            "SG" => Self::Signaled,
            _ => Self::InternalError,
        }
    }
}

/// Limit a meta file names as the reason a run was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitExceeded {
    #[default]
    NotExceeded,
    Time,
    WallTime,
    Memory,
    Output,
}

impl LimitExceeded {
    /// Read the limit out of isolate's free-form `message`
    pub fn from_message(message: Option<&str>) -> Self {
        let Some(message) = message.map(str::to_ascii_lowercase) else {
            return Self::NotExceeded;
        };

        if message.contains("time limit") && message.contains("wall") {
            Self::WallTime
        } else if message.contains("time limit") {
            Self::Time
        } else if message.contains("memory") {
            Self::Memory
        } else if ["output", "file size"].iter().any(|k| message.contains(k)) {
            Self::Output
        } else {
            Self::NotExceeded
        }
    }
}

/// Configuration for a directory mount in Isolate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (don't fail if source doesn't exist)
    /// Maps to isolate's `:maybe` flag
    #[serde(default)]
    pub optional: bool,
}
