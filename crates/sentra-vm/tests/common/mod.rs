//! Shared test utilities
//!
//! Bytecode is assembled by hand through [`Asm`], a thin fluent wrapper
//! over [`Chunk`]'s emit methods.

#![allow(dead_code)]

use sentra_vm::{Chunk, FunctionProto, Opcode, Value, VmConfig, VmError, VM};
use std::rc::Rc;

pub use pretty_assertions::{assert_eq, assert_ne};

/// Fluent chunk builder. Everything is emitted on line 1 unless
/// [`Asm::line`] says otherwise.
#[derive(Default)]
pub struct Asm {
    chunk: Chunk,
    line: i32,
}

impl Asm {
    pub fn new() -> Self {
        Self {
            chunk: Chunk::new(),
            line: 1,
        }
    }

    pub fn line(&mut self, line: i32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.chunk.emit(opcode, self.line);
        self
    }

    pub fn u8(&mut self, byte: u8) -> &mut Self {
        self.chunk.emit_u8(byte);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.chunk.emit_u16(value);
        self
    }

    pub fn constant(&mut self, value: impl Into<Value>) -> &mut Self {
        self.chunk.emit_constant(value.into(), self.line);
        self
    }

    pub fn num(&mut self, n: f64) -> &mut Self {
        self.constant(n)
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.constant(Value::string(s))
    }

    /// Opcode with a u16 name-constant operand
    pub fn named(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        let index = self.chunk.add_constant(Value::string(name));
        self.op(opcode).u16(index)
    }

    pub fn load(&mut self, slot: u8) -> &mut Self {
        self.op(Opcode::LoadFast).u8(slot)
    }

    pub fn store(&mut self, slot: u8) -> &mut Self {
        self.op(Opcode::StoreFast).u8(slot)
    }

    pub fn call(&mut self, argc: u8) -> &mut Self {
        self.op(Opcode::Call).u8(argc)
    }

    /// OpClosure over `proto`; captures are `(is_local, index)` pairs
    pub fn closure(&mut self, proto: FunctionProto, captures: &[(bool, u8)]) -> &mut Self {
        let index = self.chunk.add_constant(Value::Function(Rc::new(proto)));
        self.op(Opcode::Closure).u16(index).u8(captures.len() as u8);
        for (is_local, slot) in captures {
            self.u8(u8::from(*is_local)).u8(*slot);
        }
        self
    }

    /// OpSelect with one kind byte per case (0 recv, 1 send)
    pub fn select(&mut self, kinds: &[u8], has_default: bool) -> &mut Self {
        self.op(Opcode::Select)
            .u8(kinds.len() as u8)
            .u8(u8::from(has_default));
        for kind in kinds {
            self.u8(*kind);
        }
        self
    }

    /// Forward jump; returns the operand position for [`Asm::patch`]
    pub fn jump(&mut self, opcode: Opcode) -> usize {
        self.chunk.emit_jump(opcode, self.line)
    }

    pub fn patch(&mut self, operand: usize) -> &mut Self {
        self.chunk.patch_jump(operand);
        self
    }

    pub fn loop_to(&mut self, start: usize) -> &mut Self {
        self.chunk.emit_loop(start, self.line);
        self
    }

    pub fn offset(&self) -> usize {
        self.chunk.current_offset()
    }

    pub fn chunk(&self) -> Chunk {
        self.chunk.clone()
    }

    pub fn finish(&self) -> Rc<Chunk> {
        Rc::new(self.chunk.clone())
    }
}

/// Function template with `locals` total slots
pub fn function(name: &str, arity: u8, locals: u16, upvalues: u8, body: &Asm) -> FunctionProto {
    FunctionProto {
        name: Rc::from(name),
        arity,
        variadic: false,
        local_count: locals.max(arity as u16),
        upvalue_count: upvalues,
        chunk: body.finish(),
    }
}

pub fn variadic(name: &str, arity: u8, body: &Asm) -> FunctionProto {
    FunctionProto {
        variadic: true,
        local_count: arity as u16 + 1,
        ..function(name, arity, 0, 0, body)
    }
}

/// Run a main chunk on a fresh VM
pub fn run(asm: &Asm) -> Result<Value, VmError> {
    run_with(&mut VM::new(), asm)
}

pub fn run_with_config(config: VmConfig, asm: &Asm) -> Result<Value, VmError> {
    run_with(&mut VM::with_config(config), asm)
}

pub fn run_with(vm: &mut VM, asm: &Asm) -> Result<Value, VmError> {
    let result = vm.run_chunk(asm.finish())?;
    Ok(result.value().unwrap_or_else(|| panic!("run paused unexpectedly")))
}

pub fn numbers(ns: &[f64]) -> Value {
    Value::array(ns.iter().copied().map(Value::Number).collect())
}

/// Run and expect a runtime error of the given kind
pub fn assert_error_kind(asm: &Asm, kind: &str) -> VmError {
    match run(asm) {
        Err(err) => {
            assert_eq!(err.error.kind(), kind, "unexpected error: {}", err);
            err
        }
        Ok(value) => panic!("expected {} error, got {:?}", kind, value),
    }
}
