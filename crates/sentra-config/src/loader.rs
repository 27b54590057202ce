//! Locating and layering `sentra.toml`, the global file and `SENTRA_*` variables

use crate::global::GlobalConfig;
use crate::project::ProjectConfig;
use crate::runtime::RuntimeConfig;
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project file name searched for by [`ConfigLoader::load_from_directory`]
pub const PROJECT_FILE: &str = "sentra.toml";

/// Finds and layers configuration sources. Later layers win:
/// 1. Global config (~/.sentra/config.toml) - lowest priority
/// 2. Project config (./sentra.toml) - overrides global
/// 3. Environment variables (SENTRA_*) - overrides project
pub struct ConfigLoader {
    /// Resolved on first use
    global_config_path: Option<PathBuf>,
}

/// Every layer found by a [`ConfigLoader`]
#[derive(Debug, Clone)]
pub struct Config {
    /// Contents of sentra.toml, or defaults outside a project
    pub project: ProjectConfig,

    /// Contents of the global file, or defaults
    pub global: GlobalConfig,

    /// Environment overrides applied on top of both files
    pub env: RuntimeConfig,

    /// Project root directory (where sentra.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config file instead of ~/.sentra/config.toml
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Walks up the directory tree to find sentra.toml, then loads the
    /// global config if it exists and applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project) = self.find_project_config(start_dir)?;
        let global = self.load_global_config()?;
        let env = runtime_from_env()?;

        Ok(Config {
            project,
            global,
            env,
            project_root,
        })
    }

    /// Load an explicit project file instead of searching for one
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project = ProjectConfig::load_from_file(config_path)?;
        let global = self.load_global_config()?;
        let env = runtime_from_env()?;

        Ok(Config {
            project,
            global,
            env,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Nearest sentra.toml at or above `start_dir`
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file or home directory yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        if self.global_config_path.is_none() {
            match GlobalConfig::global_config_path() {
                Ok(path) => self.global_config_path = Some(path),
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            }
        }

        match &self.global_config_path {
            Some(path) if path.exists() => GlobalConfig::load_from_file(path),
            _ => Ok(GlobalConfig::default()),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read `SENTRA_*` runtime overrides
///
/// Variables: SENTRA_MAX_FRAMES, SENTRA_STACK_CAPACITY,
/// SENTRA_INSTRUCTION_LIMIT, SENTRA_SELECT_SEED
fn runtime_from_env() -> ConfigResult<RuntimeConfig> {
    let config = RuntimeConfig {
        max_frames: env_number("SENTRA_MAX_FRAMES")?,
        stack_capacity: env_number("SENTRA_STACK_CAPACITY")?,
        instruction_limit: env_number("SENTRA_INSTRUCTION_LIMIT")?,
        select_seed: env_number("SENTRA_SELECT_SEED")?,
    };
    config.validate()?;
    Ok(config)
}

fn env_number<T: std::str::FromStr>(var: &str) -> ConfigResult<Option<T>> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
                reason: "expected an unsigned integer".to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Effective runtime limits (global < project < environment)
    pub fn runtime(&self) -> RuntimeConfig {
        let mut runtime = self.global.runtime.unwrap_or_default();
        if let Some(project) = &self.project.runtime {
            runtime.merge(project);
        }
        runtime.merge(&self.env);
        runtime
    }

    /// Directory holding sentra.toml
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    pub fn package_name(&self) -> Option<&str> {
        self.project.package_name()
    }

    /// Whether a sentra.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_global_path(dir.join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[package]
name = "test-project"
version = "1.0.0"
"#,
        );

        let config = isolated_loader(temp_dir.path())
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.package_name(), Some("test-project"));
        assert!(config.is_project());
    }

    #[test]
    #[serial]
    fn test_no_project_config() {
        let temp_dir = TempDir::new().unwrap();

        let config = isolated_loader(temp_dir.path())
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.package_name(), None);
        assert!(!config.is_project());
        assert_eq!(config.runtime(), RuntimeConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_override_max_frames() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[runtime]
max_frames = 64
"#,
        );

        env::set_var("SENTRA_MAX_FRAMES", "32");
        let result = isolated_loader(temp_dir.path()).load_from_directory(temp_dir.path());
        env::remove_var("SENTRA_MAX_FRAMES");

        assert_eq!(result.unwrap().runtime().max_frames, Some(32));
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("SENTRA_SELECT_SEED", "seven");
        let result = isolated_loader(temp_dir.path()).load_from_directory(temp_dir.path());
        env::remove_var("SENTRA_SELECT_SEED");

        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }
}
