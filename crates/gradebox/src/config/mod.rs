use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::toolchain::{CompileConfig, MemoryUnit, RunConfig, Toolchain};
use crate::types::{Identity, MountConfig};

mod loader;
pub mod toolchain;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../gradebox.example.toml");

/// Default ratio of wall clock to CPU time allowed for a test run
pub const DEFAULT_WALL_TIME_FACTOR: f64 = 2.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("toolchain '{0}' not found in configuration")]
    ToolchainNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for Gradebox
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the Isolate binary (uses PATH if not specified).
    #[serde(default)]
    pub isolate_path: Option<PathBuf>,

    /// Isolate box this worker owns. Concurrent workers need distinct ids.
    #[serde(default)]
    pub box_id: u32,

    /// Use cgroup memory limiting instead of RLIMIT_AS.
    #[serde(default)]
    pub cgroup: bool,

    /// Cgroup root path for isolate. Must match isolate's `cg_root` config value.
    ///
    /// With `cgroup = true` the CLI creates this cgroup and enables the memory
    /// controller before invoking isolate, standing in for `isolate-cg-keeper`
    /// in container environments.
    #[serde(default = "default_cg_root")]
    pub cg_root: PathBuf,

    /// Extra directory mounts applied to every sandbox invocation
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Root of the test-case store (`<root>/<problem>/<case>/{in,out}.txt`)
    #[serde(default = "default_testcase_root")]
    pub testcase_root: PathBuf,

    /// Directory progress documents are written to
    #[serde(default = "default_progress_dir")]
    pub progress_dir: PathBuf,

    /// Diagnostic log for compile invocations
    #[serde(default = "default_compiler_log")]
    pub compiler_log: PathBuf,

    /// Diagnostic log for test runs
    #[serde(default = "default_runner_log")]
    pub runner_log: PathBuf,

    /// Wall clock limit of a test run as a multiple of its CPU time limit
    #[serde(default = "default_wall_time_factor")]
    pub wall_time_factor: f64,

    /// First uid of isolate's box users. Must match isolate's `first_uid`.
    #[serde(default = "default_first_id")]
    pub first_uid: u32,

    /// First gid of isolate's box users. Must match isolate's `first_gid`.
    #[serde(default = "default_first_id")]
    pub first_gid: u32,

    /// Identity compilers run as. Defaults to the user of box `box_id + 1`.
    #[serde(default)]
    pub compiler_identity: Option<Identity>,

    /// Identity submissions run as and owner of locked-down artifacts.
    /// Defaults to the user of box `box_id`.
    #[serde(default)]
    pub runner_identity: Option<Identity>,

    /// Toolchain configurations keyed by toolchain ID
    #[serde(default)]
    pub toolchains: HashMap<String, Toolchain>,
}

impl Config {
    /// Create an empty config with no toolchains
    pub fn empty() -> Self {
        Self {
            isolate_path: None,
            box_id: 0,
            cgroup: false,
            cg_root: default_cg_root(),
            sandbox_mounts: Vec::new(),
            testcase_root: default_testcase_root(),
            progress_dir: default_progress_dir(),
            compiler_log: default_compiler_log(),
            runner_log: default_runner_log(),
            wall_time_factor: DEFAULT_WALL_TIME_FACTOR,
            first_uid: default_first_id(),
            first_gid: default_first_id(),
            compiler_identity: None,
            runner_identity: None,
            toolchains: HashMap::new(),
        }
    }

    /// Get a toolchain by ID
    pub fn get_toolchain(&self, id: &str) -> Result<&Toolchain, ConfigError> {
        self.toolchains
            .get(id)
            .ok_or_else(|| ConfigError::ToolchainNotFound(id.to_string()))
    }

    /// The user isolate runs everything in box `box_id` as
    pub fn box_identity(&self, box_id: u32) -> Identity {
        Identity::new(
            self.first_uid.saturating_add(box_id),
            self.first_gid.saturating_add(box_id),
        )
    }

    pub fn compiler_identity(&self) -> Identity {
        self.compiler_identity
            .unwrap_or_else(|| self.box_identity(self.box_id.saturating_add(1)))
    }

    pub fn runner_identity(&self) -> Identity {
        self.runner_identity
            .unwrap_or_else(|| self.box_identity(self.box_id))
    }

    /// Get the path to the isolate binary
    pub fn isolate_binary(&self) -> PathBuf {
        self.isolate_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("isolate"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded example config should be valid")
    }
}

fn default_cg_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/isolate")
}

fn default_testcase_root() -> PathBuf {
    PathBuf::from("/var/lib/gradebox/testcases")
}

fn default_progress_dir() -> PathBuf {
    PathBuf::from("/var/lib/gradebox/progress")
}

fn default_compiler_log() -> PathBuf {
    PathBuf::from("/var/log/gradebox/compile.log")
}

fn default_runner_log() -> PathBuf {
    PathBuf::from("/var/log/gradebox/run.log")
}

fn default_wall_time_factor() -> f64 {
    DEFAULT_WALL_TIME_FACTOR
}

fn default_first_id() -> u32 {
    crate::isolate::DEFAULT_FIRST_ID
}
