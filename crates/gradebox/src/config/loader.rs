//! Configuration file loading for Gradebox
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.wall_time_factor.is_finite() && self.wall_time_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "wall_time_factor must be positive, got {}",
                self.wall_time_factor
            )));
        }

        // Compilers must not be able to touch what submissions run as
        if self.compiler_identity() == self.runner_identity() {
            return Err(ConfigError::Invalid(
                "compiler_identity and runner_identity must differ".to_string(),
            ));
        }

        // isolate picks the box from the identity, so both must be box users
        for (name, identity) in [
            ("compiler_identity", self.compiler_identity()),
            ("runner_identity", self.runner_identity()),
        ] {
            if identity.isolate_box(self.first_uid, self.first_gid).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{name} {}:{} is not an isolate box user (first_uid {}, first_gid {})",
                    identity.uid, identity.gid, self.first_uid, self.first_gid
                )));
            }
        }

        for (id, toolchain) in &self.toolchains {
            if toolchain.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "toolchain '{id}' has empty name"
                )));
            }
            if toolchain.source_name.is_empty() || toolchain.source_name.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "toolchain '{id}' needs a plain source_name"
                )));
            }

            let compile = &toolchain.compile;
            if compile.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "toolchain '{id}' has empty compile command"
                )));
            }
            if compile.exe_name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "toolchain '{id}' has empty exe_name"
                )));
            }
            if !(compile.time_limit > 0.0 && compile.wall_time_limit > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "toolchain '{id}' compile time limits must be positive"
                )));
            }
            if compile.memory_limit == 0 {
                return Err(ConfigError::Invalid(format!(
                    "toolchain '{id}' compile memory limit must be positive"
                )));
            }

            if toolchain.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "toolchain '{id}' has empty run command"
                )));
            }
        }

        Ok(())
    }
}
