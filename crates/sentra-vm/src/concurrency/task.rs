//! Tasks
//!
//! A task owns its operand stack, frame stack, handler stack and iterator
//! stack. The heap and the global table are shared by all tasks.

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::frame::{CallFrame, Handler, IterState};
use crate::vm::upvalue::OpenUpvalues;
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;

pub type TaskId = u64;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    /// Waiting in the run queue
    Runnable,
    /// Currently executing
    Running,
    /// Parked on a channel operation or select
    Blocked,
    /// Root frame returned
    Completed,
    /// Terminated by an unhandled error
    Failed,
}

/// Shared view of a task, held by `Value::Task` and the host
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
    status: Cell<TaskStatus>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: Cell::new(TaskStatus::Runnable),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status.get()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status(), TaskStatus::Completed | TaskStatus::Failed)
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.status.set(status);
    }
}

/// Result delivered to a blocked task by whoever unblocked it
#[derive(Debug, Clone)]
pub enum Resume {
    /// Push this value (channel send/recv completion)
    Value(Value),
    /// Push the select result pair
    Selected { index: i64, value: Value },
    /// Throw this error at the blocked instruction
    Error(RuntimeError),
}

/// Execution state of one task
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub handlers: Vec<Handler>,
    pub iterators: Vec<IterState>,
    pub open_upvalues: OpenUpvalues,
    pub handle: Rc<TaskHandle>,
    /// Set by the waker, consumed before the next instruction
    pub resume: Option<Resume>,
    /// Bumped on every wake so stale wait registrations are ignored
    pub wait_epoch: u64,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            stack: Vec::new(),
            frames: Vec::new(),
            handlers: Vec::new(),
            iterators: Vec::new(),
            open_upvalues: OpenUpvalues::default(),
            handle: Rc::new(TaskHandle::new(id, name)),
            resume: None,
            wait_epoch: 0,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.handle.status()
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    #[inline]
    pub fn peek(&self) -> Result<&Value, RuntimeError> {
        self.stack.last().ok_or_else(|| self.underflow())
    }

    /// Remove the top `n` values, oldest first
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let Some(start) = self.stack.len().checked_sub(n) else {
            return Err(self.underflow());
        };
        Ok(self.stack.split_off(start))
    }

    /// Innermost call frame
    #[inline]
    pub fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::InvalidBytecode {
            ip: 0,
            reason: "no active call frame",
        })
    }

    fn underflow(&self) -> RuntimeError {
        RuntimeError::InvalidBytecode {
            ip: self.frames.last().map_or(0, |f| f.ip),
            reason: "operand stack underflow",
        }
    }

    /// Close upvalues and release the stacks
    pub fn terminate(&mut self, status: TaskStatus) {
        self.open_upvalues.close_all(&self.stack);
        self.stack.clear();
        self.frames.clear();
        self.handlers.clear();
        self.iterators.clear();
        self.handle.set_status(status);
    }
}
