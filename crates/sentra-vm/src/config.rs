//! VM limits

use sentra_config::RuntimeConfig;
use serde::{Deserialize, Serialize};

/// Resource limits for one VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum call depth per task; deeper calls raise `StackOverflow`
    pub max_frames: usize,
    /// Operand stack slots per task; overflowing raises `StackOverflow`
    pub stack_capacity: usize,
    /// Abort with `ExecutionLimit` after this many instructions
    pub instruction_limit: Option<u64>,
    /// Seed for select's random choice; None draws from the thread RNG
    pub select_seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: 1024,
            stack_capacity: 65_536,
            instruction_limit: Some(100_000_000),
            select_seed: None,
        }
    }
}

impl From<&RuntimeConfig> for VmConfig {
    fn from(runtime: &RuntimeConfig) -> Self {
        let defaults = VmConfig::default();
        Self {
            max_frames: runtime.max_frames.unwrap_or(defaults.max_frames),
            stack_capacity: runtime.stack_capacity.unwrap_or(defaults.stack_capacity),
            instruction_limit: runtime.instruction_limit.or(defaults.instruction_limit),
            select_seed: runtime.select_seed,
        }
    }
}
