//! The REAP binary format.
//!
//! Big-endian throughout:
//!
//! ```text
//! "REAP" | version:u16 | instruction count:u32
//! constant count:u32 | (tag:[u8; 4] payload)*
//! function count:u32 | (name len:u16 name entry:u32)*
//! (opcode:u8 operand tag:u8 payload)*
//! ```
//!
//! Spans and parameter lists are not stored. Parameters are rebuilt from
//! the function prologues on load.

use tracing::debug;

use crate::bytecode::instruction::{Instruction, OpCode, Operand};
use crate::bytecode::program::{BytecodeProgram, Constant, FunctionEntry};
use crate::error::SerializeError;
use crate::span::Span;

pub const MAGIC: &[u8; 4] = b"REAP";
pub const VERSION: u16 = 1;

const TAG_TEXT: &[u8; 4] = b"STR:";
const TAG_INT: &[u8; 4] = b"INT:";
const TAG_FLOAT: &[u8; 4] = b"FLT:";
const TAG_BOOL: &[u8; 4] = b"BOOL";
const TAG_NONE: &[u8; 4] = b"NONE";

const OPERAND_NONE: u8 = 0x00;
const OPERAND_BOOL: u8 = 0x01;
const OPERAND_TEXT: u8 = 0x02;
const OPERAND_INT: u8 = 0x04;
const OPERAND_FLOAT: u8 = 0x08;

pub type SerializeResult<T> = Result<T, SerializeError>;

/// Encode a program. Fails rather than truncating an operand or string.
pub fn serialize(program: &BytecodeProgram) -> SerializeResult<Vec<u8>> {
    let mut out = Writer::default();
    out.bytes(MAGIC);
    out.u16(VERSION);
    out.count("instruction list", program.instructions.len())?;

    out.count("constant pool", program.constants.len())?;
    for constant in &program.constants {
        match constant {
            Constant::Text(text) => {
                out.bytes(TAG_TEXT);
                out.text("string constant", text)?;
            }
            Constant::Int(n) => {
                out.bytes(TAG_INT);
                out.bytes(&n.to_be_bytes());
            }
            Constant::Float(n) => {
                out.bytes(TAG_FLOAT);
                out.bytes(&n.to_be_bytes());
            }
            Constant::Bool(b) => {
                out.bytes(TAG_BOOL);
                out.bytes(&[u8::from(*b)]);
            }
            Constant::None => out.bytes(TAG_NONE),
        }
    }

    out.count("function table", program.functions.len())?;
    for (name, function) in &program.functions {
        out.text("function name", name)?;
        out.count("function entry", function.entry)?;
    }

    for instruction in &program.instructions {
        out.bytes(&[u8::from(instruction.opcode)]);
        match &instruction.operand {
            Operand::None => out.bytes(&[OPERAND_NONE]),
            Operand::Bool(b) => out.bytes(&[OPERAND_BOOL, u8::from(*b)]),
            Operand::Text(text) => {
                out.bytes(&[OPERAND_TEXT]);
                out.text("text operand", text)?;
            }
            Operand::Int(n) => {
                let narrow = i32::try_from(*n).map_err(|_| SerializeError::OperandOutOfRange(*n))?;
                out.bytes(&[OPERAND_INT]);
                out.bytes(&narrow.to_be_bytes());
            }
            Operand::Float(n) => {
                out.bytes(&[OPERAND_FLOAT]);
                out.bytes(&n.to_be_bytes());
            }
        }
    }

    debug!(bytes = out.buf.len(), "serialized program");
    Ok(out.buf)
}

/// Decode a program produced by [`serialize`].
pub fn deserialize(data: &[u8]) -> SerializeResult<BytecodeProgram> {
    let mut input = Reader::new(data);
    if input.take(4)? != MAGIC {
        return Err(SerializeError::BadMagic);
    }
    let version = input.u16()?;
    if version != VERSION {
        return Err(SerializeError::UnsupportedVersion(version));
    }
    let instruction_count = input.u32()? as usize;

    let mut program = BytecodeProgram::new();
    let constant_count = input.u32()?;
    for _ in 0..constant_count {
        let at = input.offset;
        let tag = input.take(4)?;
        let constant = match tag {
            t if t == TAG_TEXT => Constant::Text(input.text()?),
            t if t == TAG_INT => Constant::Int(i64::from_be_bytes(input.array()?)),
            t if t == TAG_FLOAT => Constant::Float(f64::from_be_bytes(input.array()?)),
            t if t == TAG_BOOL => Constant::Bool(input.u8()? != 0),
            t if t == TAG_NONE => Constant::None,
            other => {
                return Err(SerializeError::InvalidConstantTag(
                    String::from_utf8_lossy(other).into_owned(),
                    at,
                ))
            }
        };
        // Pushed directly: pool indices must survive even for duplicates.
        program.constants.push(constant);
    }

    let function_count = input.u32()?;
    for _ in 0..function_count {
        let name = input.text()?;
        let entry = input.u32()? as usize;
        program.add_function(name, FunctionEntry::new(entry));
    }

    program.instructions.reserve(instruction_count.min(data.len()));
    for _ in 0..instruction_count {
        let at = input.offset;
        let byte = input.u8()?;
        let opcode = OpCode::from_u8(byte).ok_or(SerializeError::InvalidOpcode(byte, at))?;
        let tag_at = input.offset;
        let operand = match input.u8()? {
            OPERAND_NONE => Operand::None,
            OPERAND_BOOL => Operand::Bool(input.u8()? != 0),
            OPERAND_TEXT => Operand::Text(input.text()?),
            OPERAND_INT => Operand::Int(i64::from(i32::from_be_bytes(input.array()?))),
            OPERAND_FLOAT => Operand::Float(f64::from_be_bytes(input.array()?)),
            tag => return Err(SerializeError::InvalidOperandTag(tag, tag_at)),
        };
        program
            .instructions
            .push(Instruction::with_operand(opcode, operand, Span::default()));
    }

    program.recover_parameters();
    debug!(
        instructions = program.instructions.len(),
        constants = program.constants.len(),
        functions = program.functions.len(),
        "deserialized program"
    );
    Ok(program)
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn u16(&mut self, n: u16) {
        self.bytes(&n.to_be_bytes());
    }

    fn count(&mut self, what: &'static str, len: usize) -> SerializeResult<()> {
        let n = u32::try_from(len).map_err(|_| SerializeError::TooLong { what, len })?;
        self.bytes(&n.to_be_bytes());
        Ok(())
    }

    fn text(&mut self, what: &'static str, text: &str) -> SerializeResult<()> {
        let len = text.len();
        let n = u16::try_from(len).map_err(|_| SerializeError::TooLong { what, len })?;
        self.u16(n);
        self.bytes(text.as_bytes());
        Ok(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> SerializeResult<&'a [u8]> {
        let rest = &self.data[self.offset..];
        if rest.len() < n {
            return Err(SerializeError::Truncated {
                offset: self.offset,
                needed: n - rest.len(),
            });
        }
        self.offset += n;
        Ok(&rest[..n])
    }

    fn array<const N: usize>(&mut self) -> SerializeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> SerializeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> SerializeResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> SerializeResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn text(&mut self) -> SerializeResult<String> {
        let len = self.u16()? as usize;
        let at = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerializeError::InvalidUtf8(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compiler::Compiler;
    use crate::lexer::Scanner;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> BytecodeProgram {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        Compiler::new().compile(&program).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let mut program = BytecodeProgram::new();
        program.add_constant(Constant::Int(-2));
        program.add_instruction(Instruction::with_operand(
            OpCode::PushConst,
            Operand::Int(0),
            Span::default(),
        ));
        let bytes = serialize(&program).unwrap();
        let expected: Vec<u8> = [
            &b"REAP"[..],
            &[0, 1],
            &[0, 0, 0, 1],
            &[0, 0, 0, 1],
            &b"INT:"[..],
            &(-2i64).to_be_bytes(),
            &[0, 0, 0, 0],
            &[0x01, 0x04, 0, 0, 0, 0],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_compiled_program_survives_reload() {
        let program = compile(
            r#"
            infect greet(soul name, soul greeting = "Hail") { reap greeting + ", " + name; }
            shadow key = "k3y";
            phantom ratio = 0.5;
            wraith lit = RISEN;
            harvest greet("Mort"), void;
            "#,
        );
        let bytes = serialize(&program).unwrap();
        let loaded = deserialize(&bytes).unwrap();
        assert_eq!(loaded.instructions, program.instructions);
        assert_eq!(loaded.constants, program.constants);
        assert_eq!(loaded.functions, program.functions);
        assert_eq!(serialize(&loaded).unwrap(), bytes);
    }

    #[test]
    fn test_wide_operand_is_rejected() {
        let mut program = BytecodeProgram::new();
        program.add_instruction(Instruction::with_operand(
            OpCode::Jmp,
            Operand::Int(i64::from(i32::MAX) + 1),
            Span::default(),
        ));
        assert_eq!(
            serialize(&program),
            Err(SerializeError::OperandOutOfRange(2_147_483_648))
        );
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(deserialize(b"NOPE\0\x01"), Err(SerializeError::BadMagic));
        assert_eq!(
            deserialize(b"REAP\0\x07\0\0\0\0"),
            Err(SerializeError::UnsupportedVersion(7))
        );
        assert_eq!(
            deserialize(b"REAP\0\x01\0\0"),
            Err(SerializeError::Truncated {
                offset: 6,
                needed: 2
            })
        );

        let mut bytes = serialize(&BytecodeProgram::new()).unwrap();
        bytes[9] = 1;
        bytes.extend_from_slice(&[0xEE, 0x00]);
        assert_eq!(deserialize(&bytes), Err(SerializeError::InvalidOpcode(0xEE, 18)));

        let mut bytes = serialize(&BytecodeProgram::new()).unwrap();
        bytes[13] = 1;
        bytes.splice(14..14, b"ABCD".iter().copied());
        assert_eq!(
            deserialize(&bytes),
            Err(SerializeError::InvalidConstantTag("ABCD".into(), 14))
        );
    }

    #[test]
    fn test_invalid_operand_tag() {
        let mut program = BytecodeProgram::new();
        program.add_instruction(Instruction::new(OpCode::Halt, Span::default()));
        let mut bytes = serialize(&program).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x03;
        assert_eq!(
            deserialize(&bytes),
            Err(SerializeError::InvalidOperandTag(0x03, last))
        );
    }
}
