//! Runtime limits (`[runtime]` section)
//!
//! Shared by the project and global configuration files. Every field is
//! optional; unset fields fall back to the VM's built-in defaults.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// `[runtime]` table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum call-frame depth per task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<usize>,

    /// Operand stack capacity per task, in value slots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_capacity: Option<usize>,

    /// Instructions executed before the run is aborted (0 is rejected)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_limit: Option<u64>,

    /// Fixed seed for select's random case choice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_seed: Option<u64>,
}

impl RuntimeConfig {
    /// Validate limits
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_frames == Some(0) {
            return Err(zero("runtime.max_frames"));
        }
        if self.stack_capacity == Some(0) {
            return Err(zero("runtime.stack_capacity"));
        }
        if self.instruction_limit == Some(0) {
            return Err(zero("runtime.instruction_limit"));
        }
        Ok(())
    }

    /// Merge another runtime config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &RuntimeConfig) {
        if other.max_frames.is_some() {
            self.max_frames = other.max_frames;
        }
        if other.stack_capacity.is_some() {
            self.stack_capacity = other.stack_capacity;
        }
        if other.instruction_limit.is_some() {
            self.instruction_limit = other.instruction_limit;
        }
        if other.select_seed.is_some() {
            self.select_seed = other.select_seed;
        }
    }
}

fn zero(field: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: "must be greater than zero".to_string(),
    }
}
