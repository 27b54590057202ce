//! Bytecode disassembler
//!
//! Converts a chunk back to a human-readable listing. Used for debugging
//! and for snapshot tests.

use super::{Chunk, Opcode};
use crate::value::Value;
use crate::vm::dispatch::instruction_len;
use std::fmt::{self, Write};

/// Disassemble a chunk
///
/// # Format
/// ```text
/// === Constants ===
/// 0: 42
/// 1: "hello"
///
/// === Instructions ===
/// 0000    1  Constant 0 (42)
/// 0003    |  Print
/// 0004    2  Halt
/// ```
///
/// The line column shows `|` when it repeats the previous instruction's line.
pub fn disassemble(chunk: &Chunk) -> String {
    let mut output = String::new();
    // Writing into a String cannot fail.
    let _ = write_listing(chunk, &mut output);
    output
}

fn write_listing(chunk: &Chunk, out: &mut String) -> fmt::Result {
    if !chunk.constants.is_empty() {
        writeln!(out, "=== Constants ===")?;
        for (idx, constant) in chunk.constants.iter().enumerate() {
            writeln!(out, "{}: {}", idx, format_constant(constant))?;
        }
        writeln!(out)?;
    }

    writeln!(out, "=== Instructions ===")?;
    let mut offset = 0;
    let mut previous_line = None;
    while offset < chunk.code.len() {
        let line = chunk.line_at(offset);
        let line_col = if previous_line == Some(line) {
            "   |".to_string()
        } else {
            format!("{:4}", line)
        };
        previous_line = Some(line);

        let Some(len) = instruction_len(&chunk.code, offset) else {
            writeln!(
                out,
                "{:04} {}  <invalid: {:#04x}>",
                offset, line_col, chunk.code[offset]
            )?;
            offset += 1;
            continue;
        };
        writeln!(
            out,
            "{:04} {}  {}",
            offset,
            line_col,
            format_instruction(chunk, offset, len)
        )?;
        offset += len;
    }
    Ok(())
}

/// Format the instruction at `offset`; `len` has already been validated
fn format_instruction(chunk: &Chunk, offset: usize, len: usize) -> String {
    let code = &chunk.code;
    let Ok(opcode) = Opcode::try_from(code[offset]) else {
        return format!("<invalid: {:#04x}>", code[offset]);
    };
    let u8_at = |i: usize| code[offset + i];
    let u16_at = |i: usize| u16::from_be_bytes([code[offset + i], code[offset + i + 1]]);
    let next = offset + len;

    match opcode {
        // Constant pool operand
        Opcode::Constant
        | Opcode::DefineGlobal
        | Opcode::GetGlobal
        | Opcode::SetGlobal
        | Opcode::IsType => {
            let index = u16_at(1);
            match chunk.constants.get(index as usize) {
                Some(value) => format!("{:?} {} ({})", opcode, index, format_constant(value)),
                None => format!("{:?} {} (<missing>)", opcode, index),
            }
        }

        // u16 slot or count
        Opcode::GetLocal
        | Opcode::SetLocal
        | Opcode::Catch
        | Opcode::Array
        | Opcode::BuildList
        | Opcode::Map
        | Opcode::BuildMap => format!("{:?} {}", opcode, u16_at(1)),

        // u8 slot or count
        Opcode::LoadFast
        | Opcode::StoreFast
        | Opcode::GetUpvalue
        | Opcode::SetUpvalue
        | Opcode::Call
        | Opcode::Spawn
        | Opcode::Unpack => format!("{:?} {}", opcode, u8_at(1)),

        // Relative jumps
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::Loop | Opcode::Try => {
            let jump = u16_at(1) as i16;
            let target = next as isize + jump as isize;
            format!("{:?} {} (-> {:04})", opcode, jump, target)
        }

        Opcode::Closure => {
            let index = u16_at(1);
            let name = match chunk.constants.get(index as usize) {
                Some(Value::Function(proto)) => proto.name.to_string(),
                _ => "?".to_string(),
            };
            let captures: Vec<String> = (0..u8_at(3) as usize)
                .map(|i| {
                    let kind = if u8_at(4 + 2 * i) != 0 { "local" } else { "upvalue" };
                    format!("{} {}", kind, u8_at(5 + 2 * i))
                })
                .collect();
            if captures.is_empty() {
                format!("Closure {} ({})", index, name)
            } else {
                format!("Closure {} ({}) [{}]", index, name, captures.join(", "))
            }
        }

        Opcode::Select => {
            let count = u8_at(1) as usize;
            let kinds: Vec<&str> = (0..count)
                .map(|i| if u8_at(3 + i) == 1 { "send" } else { "recv" })
                .collect();
            let default = if u8_at(2) & 1 != 0 { " +default" } else { "" };
            format!("Select {} [{}]{}", count, kinds.join(", "), default)
        }

        _ => format!("{:?}", opcode),
    }
}

/// Format a Value for constant pool display
fn format_constant(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s.as_ref()),
        Value::Function(f) => {
            let rest = if f.variadic { ", ..." } else { "" };
            format!("<fn {}({}{})>", f.name, f.arity, rest)
        }
        other => other.to_string(),
    }
}
