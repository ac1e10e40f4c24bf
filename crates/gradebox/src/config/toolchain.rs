use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Compile and run recipe for one language/target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    /// Human-readable name (e.g., "C++ 17 (GCC)")
    pub name: String,

    /// File name the submission is stored under in the working directory
    pub source_name: String,

    pub compile: CompileConfig,

    pub run: RunConfig,
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Program and arguments
    /// Placeholders: {src_path}, {exe_dir}, {exe_path}
    pub command: Vec<String>,

    /// Artifact file name inside the working directory (e.g., "main")
    pub exe_name: String,

    /// CPU time limit in seconds
    pub time_limit: f64,

    /// Wall clock time limit in seconds
    pub wall_time_limit: f64,

    /// Memory limit in kilobytes
    pub memory_limit: u64,

    /// Environment variables added to the compiler's environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CompileConfig {
    /// Expand placeholders in the compile command
    pub fn expand_command(&self, src_path: &Path, exe_dir: &Path, exe_path: &Path) -> Vec<String> {
        expand(
            &self.command,
            &[
                ("{src_path}", &src_path.to_string_lossy()),
                ("{exe_dir}", &exe_dir.to_string_lossy()),
                ("{exe_path}", &exe_path.to_string_lossy()),
            ],
        )
    }
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Program and arguments
    /// Placeholders: {exe_path}, {exe_dir}, {max_memory}
    pub command: Vec<String>,

    /// Environment variables added after PATH
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Name of the syscall filter profile the sandbox should apply
    #[serde(default)]
    pub seccomp_profile: Option<String>,

    /// Unit `{max_memory}` is rendered in
    #[serde(default)]
    pub memory_unit: MemoryUnit,

    /// Measure memory without enforcing it (JVM-style runtimes reserve far
    /// more address space than they use)
    #[serde(default)]
    pub memory_limit_check_only: bool,
}

impl RunConfig {
    /// Expand placeholders in the run command. `memory_limit` is in kilobytes.
    pub fn expand_command(
        &self,
        exe_path: &Path,
        exe_dir: &Path,
        memory_limit: u64,
    ) -> Vec<String> {
        expand(
            &self.command,
            &[
                ("{exe_path}", &exe_path.to_string_lossy()),
                ("{exe_dir}", &exe_dir.to_string_lossy()),
                ("{max_memory}", &self.memory_unit.render(memory_limit)),
            ],
        )
    }
}

/// Unit a memory ceiling is handed to a runtime in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryUnit {
    Bytes,
    #[default]
    Kb,
    Mb,
}

impl MemoryUnit {
    /// Render a kilobyte amount in this unit
    pub fn render(&self, kb: u64) -> String {
        match self {
            MemoryUnit::Bytes => kb.saturating_mul(1024).to_string(),
            MemoryUnit::Kb => kb.to_string(),
            MemoryUnit::Mb => (kb / 1024).to_string(),
        }
    }
}

/// Substitute placeholders argument by argument; arguments are never re-split
fn expand(command: &[String], substitutions: &[(&str, &str)]) -> Vec<String> {
    command
        .iter()
        .map(|arg| {
            substitutions
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect()
}
