//! Sandboxed compile-and-grade orchestration.
//!
//! Gradebox takes a submitted source file, compiles it inside a sandbox,
//! runs the result against every test case of a problem under hard resource
//! limits and judges each run by comparing its output with the expected one.
//!
//! # Features
//!
//! - **Grading pipeline**: compile once, then run, classify and compare per test case.
//! - **Pluggable sandbox**: any [`Sandbox`] backend; [`IsolateSandbox`] drives IOI Isolate.
//! - **Verdict precedence**: limit violations and runtime errors beat the output comparison.
//! - **Progress reporting**: snapshots after every test case through a [`ProgressSink`].
//! - **TOML configuration**: per-toolchain compile and run command templates.
//! - **cgroup v2 support**: Memory limiting in container environments.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Toolchain};
pub use grader::{GradeError, Grader, GradingJob, TestcaseResult, Verdict};
pub use isolate::{IsolateSandbox, prepare_cgroup};
pub use progress::{FileProgressSink, Progress, ProgressError, ProgressSink, TracingProgressSink};
pub use sandbox::{Sandbox, SandboxError, SandboxRequest};
pub use testcase::{TestCase, TestcaseError, TestcaseStore};
pub use types::{
    Identity, MountConfig, ResourceLimits, SandboxOutcome, SandboxResult, Telemetry,
};

pub mod compare;
pub mod config;
pub mod grader;
pub mod isolate;
pub mod progress;
pub mod sandbox;
pub mod testcase;
pub mod types;
