//! Bytecode instruction definitions for the REAPER VM.

use std::fmt;

use lazy_static::lazy_static;

use crate::span::Span;

lazy_static! {
    /// Byte -> opcode, for decoding REAP files.
    static ref DECODE_TABLE: [Option<OpCode>; 256] = {
        let mut table = [None; 256];
        for op in OpCode::ALL {
            table[op as usize] = Some(op);
        }
        table
    };
}

/// Opcodes for the bytecode virtual machine. The byte values are part of
/// the REAP file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ============ Stack ============
    /// Push a constant: PUSH_CONST <index:int>
    PushConst = 0x01,
    /// Push a frame local: PUSH_LOCAL <name:text>
    PushLocal = 0x02,
    /// Push a global: PUSH_GLOBAL <name:text>
    PushGlobal = 0x03,
    Pop = 0x04,
    Dup = 0x05,
    Swap = 0x06,

    // ============ Arithmetic ============
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Mod = 0x14,
    Neg = 0x15,
    Inc = 0x16,
    Dec = 0x17,

    // ============ Bitwise ============
    BitAnd = 0x20,
    BitOr = 0x21,
    BitXor = 0x22,
    /// Complement masked to 32 bits.
    BitNot = 0x23,
    BitShl = 0x24,
    BitShr = 0x25,
    /// 32-bit rotate left.
    BitRot = 0x26,

    // ============ Comparison ============
    Eq = 0x30,
    Ne = 0x31,
    Lt = 0x32,
    Le = 0x33,
    Gt = 0x34,
    Ge = 0x35,

    // ============ Logic ============
    /// Non-short-circuit AND of two truth values.
    LogAnd = 0x40,
    LogOr = 0x41,
    LogNot = 0x42,

    // ============ Control Flow ============
    /// Absolute jump: JMP <target:int>
    Jmp = 0x50,
    /// Pop, jump if truthy: JMP_IF <target:int>
    JmpIf = 0x51,
    /// Pop, jump if falsy: JMP_IF_NOT <target:int>
    JmpIfNot = 0x52,
    /// Call a bytecode function: CALL <name:text>, argument count on top
    Call = 0x53,
    Return = 0x54,
    /// Call a builtin, property or method: CALL_BUILTIN <name:text>
    CallBuiltin = 0x55,

    // ============ Variables ============
    StoreLocal = 0x60,
    StoreGlobal = 0x61,
    LoadLocal = 0x62,
    LoadGlobal = 0x63,

    // ============ Arrays ============
    /// Pop N items into a new array: ARRAY_NEW <count:int>
    ArrayNew = 0x70,
    ArrayGet = 0x71,
    /// Pop value, index, collection; push the collection back.
    ArraySet = 0x72,
    ArrayLen = 0x73,

    // ============ Mappings ============
    /// Pop N key/value pairs into a new mapping: DICT_NEW <count:int>
    DictNew = 0x80,
    DictGet = 0x81,
    /// Pop value, key, mapping; push the mapping back.
    DictSet = 0x82,
    DictHas = 0x83,
    DictKeys = 0x84,

    // ============ Text ============
    StrConcat = 0x90,
    StrLen = 0x91,
    StrSub = 0x92,

    // ============ Types ============
    /// Fail unless the top value has the named type: TYPE_CHECK <type:text>
    TypeCheck = 0xA0,
    /// Convert the top value: TYPE_CONVERT <target:text>
    TypeConvert = 0xA1,

    // ============ Security ============
    SecureString = 0xB0,
    ClearMemory = 0xB1,
    RateLimit = 0xB2,

    Halt = 0xFF,
}

impl OpCode {
    pub const ALL: [OpCode; 58] = [
        OpCode::PushConst,
        OpCode::PushLocal,
        OpCode::PushGlobal,
        OpCode::Pop,
        OpCode::Dup,
        OpCode::Swap,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Mod,
        OpCode::Neg,
        OpCode::Inc,
        OpCode::Dec,
        OpCode::BitAnd,
        OpCode::BitOr,
        OpCode::BitXor,
        OpCode::BitNot,
        OpCode::BitShl,
        OpCode::BitShr,
        OpCode::BitRot,
        OpCode::Eq,
        OpCode::Ne,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Gt,
        OpCode::Ge,
        OpCode::LogAnd,
        OpCode::LogOr,
        OpCode::LogNot,
        OpCode::Jmp,
        OpCode::JmpIf,
        OpCode::JmpIfNot,
        OpCode::Call,
        OpCode::Return,
        OpCode::CallBuiltin,
        OpCode::StoreLocal,
        OpCode::StoreGlobal,
        OpCode::LoadLocal,
        OpCode::LoadGlobal,
        OpCode::ArrayNew,
        OpCode::ArrayGet,
        OpCode::ArraySet,
        OpCode::ArrayLen,
        OpCode::DictNew,
        OpCode::DictGet,
        OpCode::DictSet,
        OpCode::DictHas,
        OpCode::DictKeys,
        OpCode::StrConcat,
        OpCode::StrLen,
        OpCode::StrSub,
        OpCode::TypeCheck,
        OpCode::TypeConvert,
        OpCode::SecureString,
        OpCode::ClearMemory,
        OpCode::RateLimit,
        OpCode::Halt,
    ];

    /// Convert from u8 to OpCode.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        DECODE_TABLE[byte as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::PushConst => "PUSH_CONST",
            OpCode::PushLocal => "PUSH_LOCAL",
            OpCode::PushGlobal => "PUSH_GLOBAL",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::Swap => "SWAP",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Neg => "NEG",
            OpCode::Inc => "INC",
            OpCode::Dec => "DEC",
            OpCode::BitAnd => "BIT_AND",
            OpCode::BitOr => "BIT_OR",
            OpCode::BitXor => "BIT_XOR",
            OpCode::BitNot => "BIT_NOT",
            OpCode::BitShl => "BIT_SHL",
            OpCode::BitShr => "BIT_SHR",
            OpCode::BitRot => "BIT_ROT",
            OpCode::Eq => "EQ",
            OpCode::Ne => "NE",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Gt => "GT",
            OpCode::Ge => "GE",
            OpCode::LogAnd => "LOG_AND",
            OpCode::LogOr => "LOG_OR",
            OpCode::LogNot => "LOG_NOT",
            OpCode::Jmp => "JMP",
            OpCode::JmpIf => "JMP_IF",
            OpCode::JmpIfNot => "JMP_IF_NOT",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
            OpCode::CallBuiltin => "CALL_BUILTIN",
            OpCode::StoreLocal => "STORE_LOCAL",
            OpCode::StoreGlobal => "STORE_GLOBAL",
            OpCode::LoadLocal => "LOAD_LOCAL",
            OpCode::LoadGlobal => "LOAD_GLOBAL",
            OpCode::ArrayNew => "ARRAY_NEW",
            OpCode::ArrayGet => "ARRAY_GET",
            OpCode::ArraySet => "ARRAY_SET",
            OpCode::ArrayLen => "ARRAY_LEN",
            OpCode::DictNew => "DICT_NEW",
            OpCode::DictGet => "DICT_GET",
            OpCode::DictSet => "DICT_SET",
            OpCode::DictHas => "DICT_HAS",
            OpCode::DictKeys => "DICT_KEYS",
            OpCode::StrConcat => "STR_CONCAT",
            OpCode::StrLen => "STR_LEN",
            OpCode::StrSub => "STR_SUB",
            OpCode::TypeCheck => "TYPE_CHECK",
            OpCode::TypeConvert => "TYPE_CONVERT",
            OpCode::SecureString => "SECURE_STRING",
            OpCode::ClearMemory => "CLEAR_MEMORY",
            OpCode::RateLimit => "RATE_LIMIT",
            OpCode::Halt => "HALT",
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::JmpIf | OpCode::JmpIfNot)
    }

    /// Binary opcodes the peephole pass may fold.
    pub fn is_foldable_binary(self) -> bool {
        matches!(
            self,
            OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::BitAnd
                | OpCode::BitOr
                | OpCode::BitXor
                | OpCode::BitShl
                | OpCode::BitShr
        )
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An instruction's immediate argument.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Operand {
    #[default]
    None,
    Bool(bool),
    Text(String),
    /// Stored as 64 bits; the REAP format only carries 32.
    Int(i64),
    Float(f64),
}

impl Operand {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Operand::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Operand::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Bool(b) => write!(f, "{}", b),
            Operand::Text(s) => write!(f, "{:?}", s),
            Operand::Int(n) => write!(f, "{}", n),
            Operand::Float(n) => write!(f, "{}", n),
        }
    }
}

/// One VM instruction. The span is debug information only and is not
/// serialized, so equality ignores it.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
    pub span: Span,
}

impl Instruction {
    pub fn new(opcode: OpCode, span: Span) -> Self {
        Self {
            opcode,
            operand: Operand::None,
            span,
        }
    }

    pub fn with_operand(opcode: OpCode, operand: Operand, span: Span) -> Self {
        Self {
            opcode,
            operand,
            span,
        }
    }

    /// Target of a jump instruction.
    pub fn jump_target(&self) -> Option<usize> {
        if !self.opcode.is_jump() {
            return None;
        }
        self.operand.as_int().and_then(|n| usize::try_from(n).ok())
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode && self.operand == other.operand
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::None => write!(f, "{}", self.opcode),
            _ => write!(f, "{} {}", self.opcode, self.operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for op in OpCode::ALL {
            assert_eq!(OpCode::from_u8(op as u8), Some(op));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert!(OpCode::from_u8(0x00).is_none());
        assert!(OpCode::from_u8(0x07).is_none());
        assert_eq!(OpCode::from_u8(0xFF), Some(OpCode::Halt));
    }

    #[test]
    fn test_equality_ignores_span() {
        let a = Instruction::with_operand(OpCode::Jmp, Operand::Int(4), Span::new(0, 1, 1, 1));
        let b = Instruction::with_operand(OpCode::Jmp, Operand::Int(4), Span::default());
        assert_eq!(a, b);
        assert_eq!(a.jump_target(), Some(4));
        assert_eq!(a.to_string(), "JMP 4");
    }
}
