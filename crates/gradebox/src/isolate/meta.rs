//! Meta file parsing for isolate
//!
//! Parses the meta file produced by isolate after execution and classifies the
//! run into a [`SandboxOutcome`].

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::sandbox::SandboxError;
use crate::types::{
    ExecutionStatus, LimitExceeded, ResourceLimits, SandboxOutcome, SandboxResult, Telemetry,
};

/// Malformed line in a strictly parsed meta file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("meta line {line_number} {message}: {line:?}")]
pub struct MetaParseError {
    /// 1-based
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

/// Key/value report isolate writes after `--run`
#[derive(Debug, Clone, Default)]
pub struct MetaFile {
    pub entries: HashMap<String, String>,
}

/// Split one `key:value` line; `None` for blank lines
///
/// Only the first colon separates, values such as messages may hold more.
fn parse_line(
    line_number: usize,
    line: &str,
) -> Option<Result<(String, String), MetaParseError>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let malformed = |message: &str| MetaParseError {
        line_number,
        line: line.to_string(),
        message: message.to_string(),
    };

    let entry = match trimmed.split_once(':') {
        None => Err(malformed("has no colon separator")),
        Some((key, _)) if key.trim().is_empty() => {
            Err(malformed("has an empty key before colon"))
        }
        Some((key, value)) => Ok((key.trim().to_string(), value.trim().to_string())),
    };
    Some(entry)
}

fn lines(content: &str) -> impl Iterator<Item = Result<(String, String), MetaParseError>> + '_ {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| parse_line(idx + 1, line))
}

impl MetaFile {
    /// Parse leniently, dropping malformed lines
    pub fn parse(content: &str) -> Self {
        Self {
            entries: lines(content).filter_map(Result::ok).collect(),
        }
    }

    /// Parse strictly, failing on the first malformed line
    pub fn try_parse(content: &str) -> Result<Self, MetaParseError> {
        Ok(Self {
            entries: lines(content).collect::<Result<_, _>>()?,
        })
    }

    /// Read and strictly parse the meta file isolate left at `path`
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::try_parse(&content).map_err(|e| SandboxError::MetaParseFailed(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    /// `status` entry; isolate omits it for a clean exit
    pub fn status(&self) -> ExecutionStatus {
        self.get("status")
            .map_or(ExecutionStatus::Ok, ExecutionStatus::from_isolate_status)
    }

    /// CPU time used in seconds
    pub fn time(&self) -> f64 {
        self.number("time").unwrap_or(0.0)
    }

    /// Wall clock time used in seconds
    pub fn wall_time(&self) -> f64 {
        self.number("time-wall").unwrap_or(0.0)
    }

    /// Peak memory usage in kilobytes, cg-mem preferred over max-rss
    pub fn memory(&self) -> u64 {
        self.number("cg-mem")
            .or_else(|| self.number("max-rss"))
            .unwrap_or(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.number("exitcode")
    }

    pub fn signal(&self) -> Option<i32> {
        self.number("exitsig")
    }

    pub fn message(&self) -> Option<String> {
        self.get("message").map(String::from)
    }

    /// Whether isolate reported a cgroup OOM kill
    pub fn oom_killed(&self) -> bool {
        self.get("cg-oom-killed").is_some()
    }

    /// Limit named by the message, else implied by an OOM kill or `TO`
    pub fn limit_exceeded(&self) -> LimitExceeded {
        match LimitExceeded::from_message(self.get("message")) {
            LimitExceeded::NotExceeded if self.oom_killed() => LimitExceeded::Memory,
            LimitExceeded::NotExceeded if self.status() == ExecutionStatus::TimeLimitExceeded => {
                LimitExceeded::Time
            }
            named => named,
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            cpu_time: self.time(),
            real_time: self.wall_time(),
            memory: self.memory(),
            exit_code: self.exit_code(),
            signal: self.signal(),
        }
    }

    /// Classify the run against the limits it was started with
    ///
    /// Time wins over memory, and measured usage above the memory ceiling
    /// counts as a memory violation even when the ceiling was not enforced.
    pub fn classify(&self, limits: &ResourceLimits) -> SandboxOutcome {
        let status = self.status();
        if status == ExecutionStatus::InternalError {
            return SandboxOutcome::SystemError;
        }

        match self.limit_exceeded() {
            LimitExceeded::Time | LimitExceeded::WallTime => {
                return SandboxOutcome::TimeLimitExceeded;
            }
            LimitExceeded::Memory => return SandboxOutcome::MemoryLimitExceeded,
            LimitExceeded::Output => return SandboxOutcome::RuntimeError,
            LimitExceeded::NotExceeded => {}
        }

        if self.memory() > limits.memory_limit {
            return SandboxOutcome::MemoryLimitExceeded;
        }

        match status {
            ExecutionStatus::RuntimeError | ExecutionStatus::Signaled => {
                SandboxOutcome::RuntimeError
            }
            _ if self.exit_code().unwrap_or(0) != 0 => SandboxOutcome::RuntimeError,
            _ => SandboxOutcome::Success,
        }
    }

    /// Convert to a classified sandbox result
    pub fn to_sandbox_result(&self, limits: &ResourceLimits) -> SandboxResult {
        SandboxResult {
            outcome: self.classify(limits),
            telemetry: self.telemetry(),
            message: self.message(),
        }
    }
}
