//! Bytecode chunks
//!
//! A [`Chunk`] is the unit the VM executes: raw instruction bytes, a
//! constant pool and a line table with one entry per code byte.
//! Instructions are encoded as:
//! - Opcode (1 byte)
//! - Operands (fixed per opcode, big-endian)

mod disasm;
mod opcode;
mod serialize;

pub use disasm::disassemble;
pub use opcode::Opcode;
pub use serialize::{
    deserialize_program, load_program, save_program, serialize_program, BytecodeError,
    BYTECODE_MAGIC, BYTECODE_VERSION,
};

use crate::value::Value;
use crate::vm::dispatch::instruction_len;
use std::cell::RefCell;
use std::fmt;

/// Largest constant pool a u16 operand can address
pub const MAX_CONSTANTS: usize = u16::MAX as usize + 1;

/// Bytecode container
///
/// Built once by a compiler (or by hand in tests) and shared immutably
/// by every frame executing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    /// Raw instruction bytes
    pub code: Vec<u8>,
    /// Constant pool (referenced by index, duplicates allowed)
    pub constants: Vec<Value>,
    /// Source line of every code byte
    pub lines: Vec<i32>,
    /// Resolved global indices for name constants
    pub(crate) global_slots: GlobalSlots,
}

/// Inline cache from a name constant to its global index
///
/// Global indices never change once assigned, so a resolved slot stays
/// valid for the VM that resolved it. Entries are tagged with that VM's
/// id; a chunk run by another VM resolves again. Clones start empty and
/// the cache takes no part in equality.
#[derive(Default)]
pub(crate) struct GlobalSlots {
    slots: RefCell<Vec<Option<(u64, usize)>>>,
}

impl GlobalSlots {
    pub(crate) fn get(&self, constant: u16, vm: u64) -> Option<usize> {
        match self.slots.borrow().get(constant as usize) {
            Some(Some((owner, slot))) if *owner == vm => Some(*slot),
            _ => None,
        }
    }

    pub(crate) fn set(&self, constant: u16, vm: u64, slot: usize) {
        let mut slots = self.slots.borrow_mut();
        let i = constant as usize;
        if slots.len() <= i {
            slots.resize(i + 1, None);
        }
        slots[i] = Some((vm, slot));
    }
}

impl Clone for GlobalSlots {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for GlobalSlots {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for GlobalSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GlobalSlots")
    }
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an opcode tagged with its source line
    pub fn emit(&mut self, opcode: Opcode, line: i32) {
        self.code.push(opcode as u8);
        self.lines.push(line);
    }

    /// Emit a single byte operand
    pub fn emit_u8(&mut self, byte: u8) {
        let line = self.last_line();
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Emit a u16 operand (big-endian)
    pub fn emit_u16(&mut self, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.emit_u8(hi);
        self.emit_u8(lo);
    }

    /// Emit an i16 operand (big-endian, signed)
    pub fn emit_i16(&mut self, value: i16) {
        self.emit_u16(value as u16);
    }

    /// Add a constant to the pool and return its index
    ///
    /// # Panics
    ///
    /// Panics once the pool holds [`MAX_CONSTANTS`] entries. Builders that
    /// may exceed that should use [`Chunk::try_add_constant`].
    pub fn add_constant(&mut self, value: Value) -> u16 {
        assert!(
            self.constants.len() < MAX_CONSTANTS,
            "constant pool is full"
        );
        self.constants.push(value);
        (self.constants.len() - 1) as u16
    }

    /// Add a constant, or return `None` once the pool is full
    pub fn try_add_constant(&mut self, value: Value) -> Option<u16> {
        let index = u16::try_from(self.constants.len()).ok()?;
        self.constants.push(value);
        Some(index)
    }

    /// Add a constant and emit the instruction that pushes it
    pub fn emit_constant(&mut self, value: Value, line: i32) -> u16 {
        let index = self.add_constant(value);
        self.emit(Opcode::Constant, line);
        self.emit_u16(index);
        index
    }

    /// Current instruction offset (for jump targets)
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a forward jump with a placeholder offset, returning the
    /// position of the operand for [`Chunk::patch_jump`]
    pub fn emit_jump(&mut self, opcode: Opcode, line: i32) -> usize {
        self.emit(opcode, line);
        let operand = self.current_offset();
        self.emit_i16(0);
        operand
    }

    /// Point the jump operand at `operand` to the current offset
    pub fn patch_jump(&mut self, operand: usize) {
        let jump = (self.code.len() - operand - 2) as i16;
        let [hi, lo] = jump.to_be_bytes();
        self.code[operand] = hi;
        self.code[operand + 1] = lo;
    }

    /// Emit a backward jump to `loop_start`
    pub fn emit_loop(&mut self, loop_start: usize, line: i32) {
        self.emit(Opcode::Loop, line);
        let after = self.current_offset() + 2;
        self.emit_i16(-((after - loop_start) as i16));
    }

    /// Source line of the byte at `offset`, or 0 when unknown
    pub fn line_at(&self, offset: usize) -> i32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    /// Number of local slots addressed by this chunk's code
    ///
    /// Top-level chunks carry no frame metadata, so the VM reserves this
    /// many slots before running one as a task root.
    pub fn local_slots(&self) -> usize {
        let mut max = 0usize;
        let mut offset = 0;
        while offset < self.code.len() {
            let Some(len) = instruction_len(&self.code, offset) else {
                break;
            };
            let slot = match Opcode::try_from(self.code[offset]) {
                Ok(Opcode::GetLocal | Opcode::SetLocal | Opcode::Catch) => Some(
                    u16::from_be_bytes([self.code[offset + 1], self.code[offset + 2]]) as usize,
                ),
                Ok(Opcode::LoadFast | Opcode::StoreFast) => Some(self.code[offset + 1] as usize),
                _ => None,
            };
            if let Some(slot) = slot {
                max = max.max(slot + 1);
            }
            offset += len;
        }
        max
    }

    fn last_line(&self) -> i32 {
        self.lines.last().copied().unwrap_or(0)
    }
}
