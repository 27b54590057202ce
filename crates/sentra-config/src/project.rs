//! Project Configuration (sentra.toml)
//!
//! Handles project-level configuration stored in `sentra.toml` at the project root.

use crate::runtime::RuntimeConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project configuration from sentra.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Package metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageConfig>,

    /// Runtime limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,

    /// Debugging and instrumentation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugConfig>,
}

/// Package metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    /// Package name
    pub name: String,

    /// Package version (semver)
    pub version: String,

    /// Package description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `[debug]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// Source file name reported to the debug hook
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,

    /// Collect per-opcode instruction counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<bool>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(pkg) = &self.package {
            if pkg.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "package.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
            if !is_valid_version(&pkg.version) {
                return Err(ConfigError::InvalidValue {
                    field: "package.version".to_string(),
                    reason: format!("invalid version '{}'", pkg.version),
                });
            }
        }

        if let Some(runtime) = &self.runtime {
            runtime.validate()?;
        }

        Ok(())
    }

    /// Get the package name, if present
    pub fn package_name(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.name.as_str())
    }

    /// Whether the profiler should be installed
    pub fn profile_enabled(&self) -> bool {
        self.debug
            .as_ref()
            .and_then(|d| d.profile)
            .unwrap_or(false)
    }
}

/// Basic semver validation (simplified)
fn is_valid_version(version: &str) -> bool {
    let main_version = version.split(['-', '+']).next().unwrap_or("");

    let parts: Vec<&str> = main_version.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return false;
    }

    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}
