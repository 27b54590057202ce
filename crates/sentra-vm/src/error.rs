//! Runtime error taxonomy
//!
//! Every recoverable error is thrown into the running task as a
//! `Value::Error` and can be caught by an OpTry handler. Fatal errors
//! (see [`RuntimeError::is_fatal`]) stop the whole run.

use std::fmt;
use thiserror::Error;

/// Runtime error raised by the engine or by a native function
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// Operand types not accepted by an operation
    #[error("Type error: {msg}")]
    TypeError { msg: String },
    /// Wrong number of arguments for a non-variadic callee
    #[error("Arity error: {name} expects {expected} argument(s), got {got}")]
    ArityError {
        name: String,
        expected: String,
        got: usize,
    },
    /// Div or Mod with a zero divisor
    #[error("Division by zero")]
    DivisionByZero,
    /// Array or string index outside the valid range
    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: f64, len: usize },
    /// Map lookup or delete of a missing key
    #[error("Key not found: {key}")]
    KeyNotFound { key: String },
    /// Bound method name not defined for the receiver
    #[error("Unknown method '{method}' for {type_name}")]
    UnknownMethod { type_name: String, method: String },
    /// Call depth exceeded the configured frame limit
    #[error("Stack overflow: call depth exceeded {depth}")]
    StackOverflow { depth: usize },
    /// A thrown non-error value reached the task root
    #[error("Unhandled exception: {value}")]
    UnhandledException { value: String },
    /// Send on a closed channel
    #[error("Channel closed")]
    ChannelClosed,
    /// Read of a global that was never defined
    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },
    /// Main task blocked with nothing left to run
    #[error("Deadlock: all tasks are blocked")]
    Deadlock,
    /// Configured instruction budget exhausted
    #[error("Execution limit of {limit} instructions exceeded")]
    ExecutionLimit { limit: u64 },
    /// Undecodable instruction stream
    #[error("Invalid bytecode at offset {ip}: {reason}")]
    InvalidBytecode { ip: usize, reason: &'static str },
}

impl RuntimeError {
    /// Fatal errors bypass exception handlers and end the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::Deadlock
                | RuntimeError::ExecutionLimit { .. }
                | RuntimeError::InvalidBytecode { .. }
        )
    }

    /// Short kind name, as shown by `TypeOf`-style introspection of caught errors
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::TypeError { .. } => "TypeError",
            RuntimeError::ArityError { .. } => "ArityError",
            RuntimeError::DivisionByZero => "DivisionByZero",
            RuntimeError::IndexOutOfBounds { .. } => "IndexOutOfBounds",
            RuntimeError::KeyNotFound { .. } => "KeyNotFound",
            RuntimeError::UnknownMethod { .. } => "UnknownMethod",
            RuntimeError::StackOverflow { .. } => "StackOverflow",
            RuntimeError::UnhandledException { .. } => "UnhandledException",
            RuntimeError::ChannelClosed => "ChannelClosed",
            RuntimeError::UndefinedVariable { .. } => "UndefinedVariable",
            RuntimeError::Deadlock => "Deadlock",
            RuntimeError::ExecutionLimit { .. } => "ExecutionLimit",
            RuntimeError::InvalidBytecode { .. } => "InvalidBytecode",
        }
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        RuntimeError::TypeError { msg: msg.into() }
    }
}

/// One active frame at the point of failure
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub function: String,
    pub line: i32,
}

/// Terminal failure of a run: the error plus the call stack it escaped from
#[derive(Debug, Clone, PartialEq, Error)]
pub struct VmError {
    #[source]
    pub error: RuntimeError,
    /// Innermost frame first
    pub trace: Vec<TraceFrame>,
}

impl VmError {
    pub fn new(error: RuntimeError) -> Self {
        Self {
            error,
            trace: Vec::new(),
        }
    }

    pub fn with_trace(error: RuntimeError, trace: Vec<TraceFrame>) -> Self {
        Self { error, trace }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.trace.is_empty() {
            write!(f, "\nCall stack:")?;
            for frame in &self.trace {
                write!(f, "\n  at {} (line {})", frame.function, frame.line)?;
            }
        }
        Ok(())
    }
}

impl From<RuntimeError> for VmError {
    fn from(error: RuntimeError) -> Self {
        VmError::new(error)
    }
}
