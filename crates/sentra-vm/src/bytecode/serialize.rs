//! Bytecode file format
//!
//! Little-endian layout:
//! - Header: magic `0x53454E54` ("SENT") u32, version u32, chunk count u32,
//!   main chunk index u32
//! - Per chunk: code word count u32 + code packed into u32 words,
//!   constant count u32 + tagged constants, line count u32 + i32 lines
//!
//! Function templates reference other chunks of the same file by index.

use super::{Chunk, MAX_CONSTANTS};
use crate::value::{FunctionProto, Value};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

/// "SENT"
pub const BYTECODE_MAGIC: u32 = 0x5345_4E54;

/// Highest file format version this loader accepts
///
/// Version history:
/// - Version 1: initial format with function template constants
pub const BYTECODE_VERSION: u32 = 1;

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_FUNCTION: u8 = 5;

/// Failure to read or write a bytecode file
#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("not a Sentra bytecode file (bad magic number)")]
    BadMagic,
    #[error("bytecode version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("unknown constant tag {tag}")]
    UnknownConstantTag { tag: u8 },
    #[error("bytecode truncated in {section}")]
    Truncated { section: &'static str },
    #[error("string constant is not valid UTF-8")]
    InvalidUtf8,
    #[error("chunk has {count} constants; at most 65536 are addressable")]
    TooManyConstants { count: usize },
    #[error("chunk index {index} out of range ({count} chunks)")]
    BadChunkIndex { index: u32, count: u32 },
    #[error("chunk {index} contains itself through function constants")]
    CyclicChunk { index: u32 },
    #[error("line table has {lines} entries but code has only {code} bytes")]
    LineTableMismatch { lines: usize, code: usize },
    #[error("{type_name} values cannot be stored in a constant pool")]
    UnsupportedConstant { type_name: &'static str },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize `main` and every chunk reachable through its function constants
pub fn serialize_program(main: &Rc<Chunk>) -> Result<Vec<u8>, BytecodeError> {
    let mut order: Vec<Rc<Chunk>> = Vec::new();
    let mut indices: HashMap<*const Chunk, u32> = HashMap::new();
    collect_chunks(main, &mut order, &mut indices);

    let mut bytes = Vec::new();
    write_u32(&mut bytes, BYTECODE_MAGIC);
    write_u32(&mut bytes, BYTECODE_VERSION);
    write_u32(&mut bytes, order.len() as u32);
    write_u32(&mut bytes, 0);

    for chunk in &order {
        let words = chunk.code.chunks(4);
        write_u32(&mut bytes, words.len() as u32);
        for word in words {
            let mut packed = [0u8; 4];
            packed[..word.len()].copy_from_slice(word);
            bytes.extend_from_slice(&packed);
        }

        write_u32(&mut bytes, chunk.constants.len() as u32);
        for constant in &chunk.constants {
            write_constant(&mut bytes, constant, &indices)?;
        }

        write_u32(&mut bytes, chunk.lines.len() as u32);
        for line in &chunk.lines {
            bytes.extend_from_slice(&line.to_le_bytes());
        }
    }

    Ok(bytes)
}

/// Main chunk is assigned index 0; nested chunks follow in discovery order.
fn collect_chunks(
    chunk: &Rc<Chunk>,
    order: &mut Vec<Rc<Chunk>>,
    indices: &mut HashMap<*const Chunk, u32>,
) {
    if indices.contains_key(&Rc::as_ptr(chunk)) {
        return;
    }
    indices.insert(Rc::as_ptr(chunk), order.len() as u32);
    order.push(chunk.clone());
    for constant in &chunk.constants {
        if let Value::Function(proto) = constant {
            collect_chunks(&proto.chunk, order, indices);
        }
    }
}

fn write_constant(
    bytes: &mut Vec<u8>,
    value: &Value,
    indices: &HashMap<*const Chunk, u32>,
) -> Result<(), BytecodeError> {
    match value {
        Value::Nil => bytes.push(TAG_NIL),
        Value::Bool(b) => {
            bytes.push(TAG_BOOL);
            bytes.push(u8::from(*b));
        }
        Value::Number(n) => {
            bytes.push(TAG_FLOAT);
            bytes.extend_from_slice(&n.to_le_bytes());
        }
        Value::String(s) => {
            bytes.push(TAG_STRING);
            write_str(bytes, s);
        }
        Value::Function(proto) => {
            bytes.push(TAG_FUNCTION);
            write_str(bytes, &proto.name);
            bytes.push(proto.arity);
            bytes.push(u8::from(proto.variadic));
            bytes.extend_from_slice(&proto.local_count.to_le_bytes());
            bytes.push(proto.upvalue_count);
            let index = indices
                .get(&Rc::as_ptr(&proto.chunk))
                .copied()
                .unwrap_or_default();
            write_u32(bytes, index);
        }
        other => {
            return Err(BytecodeError::UnsupportedConstant {
                type_name: other.type_name(),
            })
        }
    }
    Ok(())
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn write_str(bytes: &mut Vec<u8>, s: &str) {
    write_u32(bytes, s.len() as u32);
    bytes.extend_from_slice(s.as_bytes());
}

/// Constant as read from the file, before function chunks are linked
enum RawConstant {
    Value(Value),
    Function {
        name: Rc<str>,
        arity: u8,
        variadic: bool,
        local_count: u16,
        upvalue_count: u8,
        chunk: u32,
    },
}

struct RawChunk {
    code: Vec<u8>,
    constants: Vec<RawConstant>,
    lines: Vec<i32>,
}

/// Deserialize a program, returning its main chunk
pub fn deserialize_program(bytes: &[u8]) -> Result<Rc<Chunk>, BytecodeError> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.u32("header")? != BYTECODE_MAGIC {
        return Err(BytecodeError::BadMagic);
    }
    let version = reader.u32("header")?;
    if version > BYTECODE_VERSION {
        return Err(BytecodeError::UnsupportedVersion {
            found: version,
            supported: BYTECODE_VERSION,
        });
    }
    let count = reader.u32("header")?;
    let main = reader.u32("header")?;
    if main >= count {
        return Err(BytecodeError::BadChunkIndex { index: main, count });
    }

    let mut raw = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        raw.push(read_chunk(&mut reader)?);
    }

    let mut linker = Linker {
        raw: &raw,
        built: vec![None; raw.len()],
        visiting: vec![false; raw.len()],
    };
    let chunk = linker.build(main)?;
    debug!(chunks = count, version, "loaded bytecode program");
    Ok(chunk)
}

fn read_chunk(reader: &mut Reader<'_>) -> Result<RawChunk, BytecodeError> {
    let words = reader.u32("code")? as usize;
    let mut code = Vec::with_capacity(words.saturating_mul(4).min(reader.remaining()));
    for _ in 0..words {
        code.extend_from_slice(&reader.u32("code")?.to_le_bytes());
    }

    let constant_count = reader.u32("constants")? as usize;
    if constant_count > MAX_CONSTANTS {
        return Err(BytecodeError::TooManyConstants {
            count: constant_count,
        });
    }
    let mut constants = Vec::with_capacity(constant_count.min(reader.remaining()));
    for _ in 0..constant_count {
        constants.push(read_constant(reader)?);
    }

    let line_count = reader.u32("lines")? as usize;
    if line_count > code.len() {
        return Err(BytecodeError::LineTableMismatch {
            lines: line_count,
            code: code.len(),
        });
    }
    let mut lines = Vec::with_capacity(line_count);
    for _ in 0..line_count {
        lines.push(reader.i32("lines")?);
    }
    code.truncate(line_count);

    Ok(RawChunk {
        code,
        constants,
        lines,
    })
}

fn read_constant(reader: &mut Reader<'_>) -> Result<RawConstant, BytecodeError> {
    let section = "constants";
    let value = match reader.u8(section)? {
        TAG_NIL => Value::Nil,
        TAG_BOOL => Value::Bool(reader.u8(section)? != 0),
        TAG_INT => Value::Number(reader.i64(section)? as f64),
        TAG_FLOAT => Value::Number(reader.f64(section)?),
        TAG_STRING => Value::String(reader.string(section)?),
        TAG_FUNCTION => {
            return Ok(RawConstant::Function {
                name: reader.string(section)?,
                arity: reader.u8(section)?,
                variadic: reader.u8(section)? != 0,
                local_count: reader.u16(section)?,
                upvalue_count: reader.u8(section)?,
                chunk: reader.u32(section)?,
            })
        }
        tag => return Err(BytecodeError::UnknownConstantTag { tag }),
    };
    Ok(RawConstant::Value(value))
}

struct Linker<'a> {
    raw: &'a [RawChunk],
    built: Vec<Option<Rc<Chunk>>>,
    visiting: Vec<bool>,
}

impl Linker<'_> {
    fn build(&mut self, index: u32) -> Result<Rc<Chunk>, BytecodeError> {
        let slot = index as usize;
        let raw_chunks = self.raw;
        let Some(raw) = raw_chunks.get(slot) else {
            return Err(BytecodeError::BadChunkIndex {
                index,
                count: raw_chunks.len() as u32,
            });
        };
        if let Some(chunk) = &self.built[slot] {
            return Ok(chunk.clone());
        }
        if self.visiting[slot] {
            return Err(BytecodeError::CyclicChunk { index });
        }
        self.visiting[slot] = true;

        let mut constants = Vec::with_capacity(raw.constants.len());
        for constant in &raw.constants {
            constants.push(match constant {
                RawConstant::Value(value) => value.clone(),
                RawConstant::Function {
                    name,
                    arity,
                    variadic,
                    local_count,
                    upvalue_count,
                    chunk,
                } => Value::Function(Rc::new(FunctionProto {
                    name: name.clone(),
                    arity: *arity,
                    variadic: *variadic,
                    local_count: *local_count,
                    upvalue_count: *upvalue_count,
                    chunk: self.build(*chunk)?,
                })),
            });
        }

        let chunk = Rc::new(Chunk {
            code: raw.code.clone(),
            constants,
            lines: raw.lines.clone(),
            ..Chunk::default()
        });
        self.visiting[slot] = false;
        self.built[slot] = Some(chunk.clone());
        Ok(chunk)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize, section: &'static str) -> Result<&'a [u8], BytecodeError> {
        if self.remaining() < n {
            return Err(BytecodeError::Truncated { section });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, section: &'static str) -> Result<[u8; N], BytecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, section)?);
        Ok(out)
    }

    fn u8(&mut self, section: &'static str) -> Result<u8, BytecodeError> {
        Ok(self.take(1, section)?[0])
    }

    fn u16(&mut self, section: &'static str) -> Result<u16, BytecodeError> {
        Ok(u16::from_le_bytes(self.array(section)?))
    }

    fn u32(&mut self, section: &'static str) -> Result<u32, BytecodeError> {
        Ok(u32::from_le_bytes(self.array(section)?))
    }

    fn i32(&mut self, section: &'static str) -> Result<i32, BytecodeError> {
        Ok(i32::from_le_bytes(self.array(section)?))
    }

    fn i64(&mut self, section: &'static str) -> Result<i64, BytecodeError> {
        Ok(i64::from_le_bytes(self.array(section)?))
    }

    fn f64(&mut self, section: &'static str) -> Result<f64, BytecodeError> {
        Ok(f64::from_le_bytes(self.array(section)?))
    }

    fn string(&mut self, section: &'static str) -> Result<Rc<str>, BytecodeError> {
        let len = self.u32(section)? as usize;
        let raw = self.take(len, section)?;
        std::str::from_utf8(raw)
            .map(Rc::from)
            .map_err(|_| BytecodeError::InvalidUtf8)
    }
}

/// Write a program to a `.sbc` file
pub fn save_program(path: impl AsRef<Path>, main: &Rc<Chunk>) -> Result<(), BytecodeError> {
    let bytes = serialize_program(main)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read a program from a bytecode file
pub fn load_program(path: impl AsRef<Path>) -> Result<Rc<Chunk>, BytecodeError> {
    let bytes = std::fs::read(path.as_ref())?;
    debug!(path = %path.as_ref().display(), size = bytes.len(), "reading bytecode file");
    deserialize_program(&bytes)
}
