//! Sentra VM - bytecode virtual machine for the Sentra language
//!
//! This library provides the execution engine:
//! - The instruction set, chunks and the binary program format
//! - A stack machine with closures, exceptions and iteration
//! - Cooperative tasks communicating over channels
//! - A native function library reachable as globals and methods

/// Sentra VM version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bytecode;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod globals;
pub mod method_dispatch;
pub mod native;
pub mod value;
pub mod vm;

pub use bytecode::{
    deserialize_program, disassemble, load_program, save_program, serialize_program,
    BytecodeError, Chunk, Opcode, MAX_CONSTANTS,
};
pub use concurrency::{TaskId, TaskStatus};
pub use config::VmConfig;
pub use error::{RuntimeError, TraceFrame, VmError};
pub use native::{NativeFunctionBuilder, Output};
pub use value::{Arity, FunctionProto, Value, ValueMap};
pub use vm::{DebugHook, DebugInfo, ProfileSummary, VmRunResult, VM};
