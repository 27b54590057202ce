//! Call frames and per-task unwinding records

use crate::bytecode::Chunk;
use crate::error::RuntimeError;
use crate::value::{Closure, Value};
use std::rc::Rc;

/// Call frame for function calls
///
/// Each call pushes a frame that tracks:
/// - The closure being run and its chunk
/// - The next instruction to execute (ip)
/// - Where the function's locals start on the task's stack (stack_base)
/// - Where this frame's iterators start on the task's iterator stack
///
/// The task root (a top-level chunk or a spawned closure) also runs in a
/// frame, with stack_base 0.
///
/// ## Stack Layout Example
///
/// ```text
/// Stack with two frames (main called "add" with 2 args):
///
/// [m_local0][m_local1][tmp] | [arg0][arg1][local2][tmp]
///  ^                          ^
///  main frame base            add frame base
/// ```
///
/// Local variable access is frame-relative:
/// - GetLocal 0 in main -> stack[0]
/// - GetLocal 0 in add -> stack[stack_base + 0]
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub closure: Rc<Closure>,
    pub chunk: Rc<Chunk>,
    pub ip: usize,
    /// Stack index of local 0
    pub stack_base: usize,
    pub local_count: usize,
    /// Iterator stack height at frame entry
    pub iter_base: usize,
}

impl CallFrame {
    pub fn new(closure: Rc<Closure>, stack_base: usize, iter_base: usize) -> Self {
        let chunk = closure.proto.chunk.clone();
        let local_count = closure.proto.frame_slots();
        Self {
            closure,
            chunk,
            ip: 0,
            stack_base,
            local_count,
            iter_base,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.closure.proto.name
    }

    /// Source line of the instruction at `ip`
    pub fn line(&self, ip: usize) -> i32 {
        self.chunk.line_at(ip)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, RuntimeError> {
        let byte = *self.chunk.code.get(self.ip).ok_or(RuntimeError::InvalidBytecode {
            ip: self.ip,
            reason: "operand runs past end of code",
        })?;
        self.ip += 1;
        Ok(byte)
    }

    /// Read a u16 operand (big-endian)
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, RuntimeError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    #[inline]
    pub fn read_i16(&mut self) -> Result<i16, RuntimeError> {
        self.read_u16().map(|v| v as i16)
    }

    /// Apply a relative jump measured from the current ip
    pub fn jump(&mut self, offset: i16) -> Result<(), RuntimeError> {
        let target = self.ip as isize + offset as isize;
        if target < 0 || target as usize > self.chunk.code.len() {
            return Err(RuntimeError::InvalidBytecode {
                ip: self.ip,
                reason: "jump target outside chunk",
            });
        }
        self.ip = target as usize;
        Ok(())
    }

    pub fn constant(&self, index: u16) -> Result<&Value, RuntimeError> {
        self.chunk
            .constants
            .get(index as usize)
            .ok_or(RuntimeError::InvalidBytecode {
                ip: self.ip,
                reason: "constant index out of range",
            })
    }
}

/// Active OpTry record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    /// Absolute offset of the handler code in the registering frame's chunk
    pub target: usize,
    pub stack_depth: usize,
    /// Frame count when the handler was registered
    pub frame_depth: usize,
    pub iter_depth: usize,
}

/// Snapshot taken by OpIterStart
#[derive(Debug, Clone)]
pub struct IterState {
    pub items: Vec<Value>,
    pub cursor: usize,
}

impl IterState {
    pub fn next_item(&mut self) -> Option<Value> {
        let item = self.items.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(item)
    }
}
