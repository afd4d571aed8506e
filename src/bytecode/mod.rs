//! Bytecode backend for REAPER.
//!
//! A second execution engine next to the tree-walking interpreter. It
//! covers the procedural subset of the language; constructs outside it
//! are rejected at compile time.
//!
//! # Architecture
//!
//! - `instruction`: opcodes and operands
//! - `program`: instructions, constant pool and function table
//! - `compiler`: lowers the AST into a `BytecodeProgram`
//! - `peephole`: local rewrites after compilation
//! - `vm`: stack-based virtual machine with resource limits
//! - `serializer`: the REAP binary format
//! - `disassembler`: debug listings

pub mod compiler;
pub mod disassembler;
pub mod instruction;
pub mod peephole;
pub mod program;
pub mod serializer;
pub mod vm;

pub use compiler::{CompileResult, Compiler};
pub use disassembler::{disassemble, print_disassembly};
pub use instruction::{Instruction, OpCode, Operand};
pub use program::{BytecodeProgram, Constant, FunctionEntry};
pub use serializer::{deserialize, serialize};
pub use vm::{VMResult, VmState, VM};
