//! Debugger hook
//!
//! The only instrumentation seam of the VM. Breakpoints, stepping and
//! watches belong to the debugger behind the hook.

use crate::concurrency::TaskId;
use crate::error::RuntimeError;
use crate::value::Value;

/// Source position of the instruction about to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub file: String,
    pub line: i32,
    pub function: String,
}

pub trait DebugHook {
    /// Called before every instruction. Returning `false` pauses the run;
    /// the same instruction is offered again when the run resumes.
    fn on_instruction(&mut self, task: TaskId, ip: usize, info: &DebugInfo) -> bool;

    fn on_call(&mut self, _task: TaskId, _function: &str, _depth: usize) {}

    /// Called when a frame is left. Frames discarded by a throw report
    /// the thrown value.
    fn on_return(&mut self, _task: TaskId, _function: &str, _value: &Value) {}

    /// Called when an error is raised, before handlers are searched
    fn on_error(&mut self, _task: TaskId, _error: &RuntimeError) {}
}
