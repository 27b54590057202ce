//! Sentra Configuration System
//!
//! Provides configuration management for the Sentra runtime:
//! - Project configuration (sentra.toml)
//! - Global user configuration (~/.sentra/config.toml)
//! - Runtime limits shared by both (`[runtime]` section)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.sentra/config.toml)
//! 2. Project config (./sentra.toml)
//! 3. Environment variables (SENTRA_*)
//!
//! # Example
//!
//! ```no_run
//! use sentra_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("max frames: {:?}", config.runtime().max_frames);
//! ```

pub mod global;
pub mod loader;
pub mod project;
pub mod runtime;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid environment variable {var}={value}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::{DebugConfig, PackageConfig, ProjectConfig};
pub use runtime::RuntimeConfig;
