//! Bytecode instruction set
//!
//! Stack-based bytecode organized by category. Each opcode has a fixed
//! operand layout; the only variable-length instructions (Closure, Select)
//! carry their own count operand.

/// Bytecode opcode
///
/// Explicit byte values keep the serialized format stable.
/// Operands are encoded inline after the opcode byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Constants (0x01-0x07) =====
    /// Push constant from pool [u16 index]
    Constant = 0x01,
    /// Push nil
    Nil = 0x02,
    /// Push true
    True = 0x03,
    /// Push false
    False = 0x04,

    // ===== Stack manipulation (0x08-0x0F) =====
    /// Pop and discard top of stack
    Pop = 0x08,
    /// Duplicate top of stack
    Dup = 0x09,
    /// Pop a value and write its string form to the VM output
    Print = 0x0A,

    // ===== Variables (0x10-0x1F) =====
    /// Load local variable [u16 slot]
    GetLocal = 0x10,
    /// Store top of stack to local, leaving it on the stack [u16 slot]
    SetLocal = 0x11,
    /// Load local variable [u8 slot]
    LoadFast = 0x12,
    /// Pop into local variable [u8 slot]
    StoreFast = 0x13,
    /// Pop into a (possibly new) global [u16 name constant]
    DefineGlobal = 0x14,
    /// Load global variable [u16 name constant]
    GetGlobal = 0x15,
    /// Store top of stack to global, leaving it on the stack [u16 name constant]
    SetGlobal = 0x16,
    /// Load captured variable [u8 index]
    GetUpvalue = 0x17,
    /// Store top of stack to captured variable [u8 index]
    SetUpvalue = 0x18,

    // ===== Arithmetic (0x20-0x2F) =====
    /// Pop b, pop a, push a + b
    Add = 0x20,
    /// Pop b, pop a, push a - b
    Sub = 0x21,
    /// Pop b, pop a, push a * b
    Mul = 0x22,
    /// Pop b, pop a, push a / b
    Div = 0x23,
    /// Pop b, pop a, push a % b
    Mod = 0x24,
    /// Pop a, push -a
    Negate = 0x25,

    // ===== Comparison (0x30-0x3F) =====
    /// Pop b, pop a, push a == b
    Equal = 0x30,
    /// Pop b, pop a, push a != b
    NotEqual = 0x31,
    /// Pop b, pop a, push a > b
    Greater = 0x32,
    /// Pop b, pop a, push a < b
    Less = 0x33,
    /// Pop b, pop a, push a >= b
    GreaterEqual = 0x34,
    /// Pop b, pop a, push a <= b
    LessEqual = 0x35,

    // ===== Logical (0x40-0x4F) =====
    /// Pop a, push !a
    Not = 0x40,
    /// Pop b, pop a, push a if a is falsy else b
    And = 0x41,
    /// Pop b, pop a, push a if a is truthy else b
    Or = 0x42,

    // ===== Control flow (0x50-0x5F) =====
    /// Unconditional jump [i16 offset]
    Jump = 0x50,
    /// Pop condition, jump if falsy [i16 offset]
    JumpIfFalse = 0x51,
    /// Jump backward [i16 offset]
    Loop = 0x52,

    // ===== Functions (0x60-0x6F) =====
    /// Call callee on top of stack [u8 arg_count]
    Call = 0x60,
    /// Create closure [u16 template, u8 count, count x (u8 is_local, u8 index)]
    Closure = 0x61,
    /// Return from function
    Return = 0x62,

    // ===== Arrays (0x70-0x77) =====
    /// Create array from stack [u16 count]
    Array = 0x70,
    /// Create array from stack with exact capacity [u16 count]
    BuildList = 0x71,
    /// Pop key, pop collection, push collection[key]
    Index = 0x72,
    /// Pop value, pop key, pop collection, collection[key] = value, push value
    SetIndex = 0x73,
    /// Pop collection, push its length
    ArrayLen = 0x74,
    /// Pop array, push its first N elements [u8 count]
    Unpack = 0x75,

    // ===== Maps (0x78-0x7F) =====
    /// Create map from key/value pairs on the stack [u16 pair_count]
    Map = 0x78,
    /// Create map with reserved capacity [u16 pair_count]
    BuildMap = 0x79,
    /// Pop key, pop map, push map[key]
    MapGet = 0x7A,
    /// Pop value, pop key, pop map, map[key] = value, push value
    MapSet = 0x7B,
    /// Pop key, pop map, remove key, push removed value
    MapDelete = 0x7C,
    /// Pop map, push array of keys
    MapKeys = 0x7D,
    /// Pop map, push array of values
    MapValues = 0x7E,

    // ===== Strings (0x88-0x8F) =====
    /// Pop b, pop a, push str(a) + str(b)
    Concat = 0x88,
    /// Pop string, push character count
    StringLen = 0x89,
    /// Pop end, pop start, pop string, push the character range
    Substring = 0x8A,
    /// Pop a, push str(a)
    ToString = 0x8B,

    // ===== Iteration (0x90-0x97) =====
    /// Pop collection, push a snapshot iterator on the iterator stack
    IterStart = 0x90,
    /// Push next element and true, or nil and false when exhausted
    IterNext = 0x91,
    /// Drop the innermost iterator
    IterEnd = 0x92,

    // ===== Exceptions (0xA0-0xA7) =====
    /// Register a handler [i16 offset to handler code]
    Try = 0xA0,
    /// Pop handler, pop thrown value into local [u16 slot]
    Catch = 0xA1,
    /// Pop a value and throw it
    Throw = 0xA2,
    /// Pop handler after the protected block completed normally
    EndTry = 0xA3,

    // ===== Types (0xA8-0xAF) =====
    /// Pop a, push its type name
    TypeOf = 0xA8,
    /// Pop a, push whether its type name equals a constant [u16 name constant]
    IsType = 0xA9,

    // ===== Concurrency (0xB0-0xBF) =====
    /// Start a task running callee [u8 arg_count]
    Spawn = 0xB0,
    /// Pop capacity, push a new channel
    ChannelNew = 0xB1,
    /// Pop value, pop channel, send (may block), push nil
    ChannelSend = 0xB2,
    /// Pop channel, receive (may block), push value
    ChannelRecv = 0xB3,
    /// Pop channel, close it, push nil
    ChannelClose = 0xB4,
    /// Choose among channel operations [u8 count, u8 flags, count x u8 kind]
    Select = 0xB5,
    /// Move the current task to the back of the run queue
    Yield = 0xB6,

    // ===== Special =====
    /// End the current task
    Halt = 0xFF,
}

impl Opcode {
    /// Every opcode, in byte order
    pub const ALL: [Opcode; 71] = [
        Opcode::Constant,
        Opcode::Nil,
        Opcode::True,
        Opcode::False,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::Print,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::LoadFast,
        Opcode::StoreFast,
        Opcode::DefineGlobal,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::GetUpvalue,
        Opcode::SetUpvalue,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Negate,
        Opcode::Equal,
        Opcode::NotEqual,
        Opcode::Greater,
        Opcode::Less,
        Opcode::GreaterEqual,
        Opcode::LessEqual,
        Opcode::Not,
        Opcode::And,
        Opcode::Or,
        Opcode::Jump,
        Opcode::JumpIfFalse,
        Opcode::Loop,
        Opcode::Call,
        Opcode::Closure,
        Opcode::Return,
        Opcode::Array,
        Opcode::BuildList,
        Opcode::Index,
        Opcode::SetIndex,
        Opcode::ArrayLen,
        Opcode::Unpack,
        Opcode::Map,
        Opcode::BuildMap,
        Opcode::MapGet,
        Opcode::MapSet,
        Opcode::MapDelete,
        Opcode::MapKeys,
        Opcode::MapValues,
        Opcode::Concat,
        Opcode::StringLen,
        Opcode::Substring,
        Opcode::ToString,
        Opcode::IterStart,
        Opcode::IterNext,
        Opcode::IterEnd,
        Opcode::Try,
        Opcode::Catch,
        Opcode::Throw,
        Opcode::EndTry,
        Opcode::TypeOf,
        Opcode::IsType,
        Opcode::Spawn,
        Opcode::ChannelNew,
        Opcode::ChannelSend,
        Opcode::ChannelRecv,
        Opcode::ChannelClose,
        Opcode::Select,
        Opcode::Yield,
        Opcode::Halt,
    ];
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        crate::vm::dispatch::decode_opcode(byte).ok_or(())
    }
}
