//! Instruction decoding for the VM
//!
//! Uses a static lookup table for O(1) opcode decoding instead of
//! match-based dispatch, reducing branch mispredictions in the hot loop.

use crate::bytecode::Opcode;

/// Static dispatch table mapping byte values to optional Opcodes.
/// Indexed by the raw u8 opcode byte for O(1) lookup.
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table: [Option<Opcode>; 256] = [None; 256];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let op = Opcode::ALL[i];
        table[op as u8 as usize] = Some(op);
        i += 1;
    }
    table
};

/// Decode an opcode byte using the static lookup table.
/// Returns None for unassigned bytes.
#[inline(always)]
pub fn decode_opcode(byte: u8) -> Option<Opcode> {
    OPCODE_TABLE[byte as usize]
}

/// Number of fixed operand bytes following an opcode.
///
/// Closure and Select have a fixed prefix plus a counted tail; use
/// [`instruction_len`] when walking code.
#[inline(always)]
pub fn operand_size(opcode: Opcode) -> usize {
    match opcode {
        // u16 operand
        Opcode::Constant
        | Opcode::GetLocal
        | Opcode::SetLocal
        | Opcode::DefineGlobal
        | Opcode::GetGlobal
        | Opcode::SetGlobal
        | Opcode::Array
        | Opcode::BuildList
        | Opcode::Map
        | Opcode::BuildMap
        | Opcode::Catch
        | Opcode::IsType => 2,
        // i16 operand
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::Loop | Opcode::Try => 2,
        // u8 operand
        Opcode::LoadFast
        | Opcode::StoreFast
        | Opcode::GetUpvalue
        | Opcode::SetUpvalue
        | Opcode::Call
        | Opcode::Spawn
        | Opcode::Unpack => 1,
        // u16 template + u8 count, then 2 bytes per upvalue
        Opcode::Closure => 3,
        // u8 count + u8 flags, then 1 byte per case
        Opcode::Select => 2,
        _ => 0,
    }
}

/// Total encoded length of the instruction starting at `offset`.
///
/// Returns None for an unassigned opcode byte or an instruction that
/// runs past the end of `code`.
pub fn instruction_len(code: &[u8], offset: usize) -> Option<usize> {
    let opcode = decode_opcode(*code.get(offset)?)?;
    let fixed = 1 + operand_size(opcode);
    let len = match opcode {
        Opcode::Closure => fixed + 2 * (*code.get(offset + 3)? as usize),
        Opcode::Select => fixed + *code.get(offset + 1)? as usize,
        _ => fixed,
    };
    if offset + len > code.len() {
        return None;
    }
    Some(len)
}
