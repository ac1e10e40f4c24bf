use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{SandboxOutcome, Telemetry};

/// Final judgement of one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
    CompilationError,
}

impl Verdict {
    /// Verdict for a run that did not finish successfully
    ///
    /// Returns `None` for [`SandboxOutcome::Success`], whose verdict depends
    /// on the output comparison.
    pub fn from_failure(outcome: SandboxOutcome) -> Option<Self> {
        match outcome {
            SandboxOutcome::Success => None,
            SandboxOutcome::TimeLimitExceeded => Some(Verdict::TimeLimitExceeded),
            SandboxOutcome::MemoryLimitExceeded => Some(Verdict::MemoryLimitExceeded),
            SandboxOutcome::RuntimeError => Some(Verdict::RuntimeError),
            SandboxOutcome::SystemError => Some(Verdict::SystemError),
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
            Verdict::SystemError => "SE",
            Verdict::CompilationError => "CE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// Outcome of grading one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestcaseResult {
    /// Test-case id; absent on a compilation-error record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub verdict: Verdict,

    /// Raw usage as reported by the sandbox
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,

    /// Compiler output of a failed build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl TestcaseResult {
    pub fn new(id: impl Into<String>, verdict: Verdict, telemetry: Option<Telemetry>) -> Self {
        Self {
            id: Some(id.into()),
            verdict,
            telemetry,
            diagnostics: None,
        }
    }

    /// The single record produced when no artifact could be built
    pub fn compilation_error(diagnostics: Option<String>) -> Self {
        Self {
            id: None,
            verdict: Verdict::CompilationError,
            telemetry: None,
            diagnostics,
        }
    }
}
