//! A compiled program: instructions, constant pool and function table.

use std::fmt;

use indexmap::IndexMap;

use crate::bytecode::instruction::{Instruction, OpCode, Operand};
use crate::interpreter::value::Value;

/// Local holding the caller's argument count inside a function frame.
pub const ARGC_LOCAL: &str = "$argc";

/// A constant value in the constant pool.
#[derive(Debug, Clone)]
pub enum Constant {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Text(a), Constant::Text(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            // Bitwise so that 0.0 and -0.0 stay distinct pool entries.
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::None, Constant::None) => true,
            _ => false,
        }
    }
}

impl Constant {
    /// Pool form of a value, for the kinds the REAP format can carry.
    pub fn from_value(value: &Value) -> Option<Constant> {
        match value {
            Value::Text(s) => Some(Constant::Text(s.clone())),
            Value::Int(n) => Some(Constant::Int(*n)),
            Value::Float(n) => Some(Constant::Float(*n)),
            Value::Bool(b) => Some(Constant::Bool(*b)),
            Value::Void => Some(Constant::None),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Constant::Text(s) => Value::Text(s.clone()),
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::Bool(b) => Value::Bool(*b),
            Constant::None => Value::Void,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Text(s) => write!(f, "{:?}", s),
            Constant::None => f.write_str("void"),
            other => write!(f, "{}", other.to_value()),
        }
    }
}

/// Where a function starts and how its parameters bind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionEntry {
    pub entry: usize,
    pub params: Vec<String>,
    /// Parallel to `params`: whether the parameter has a default.
    pub defaults: Vec<bool>,
}

impl FunctionEntry {
    pub fn new(entry: usize) -> Self {
        Self {
            entry,
            ..Self::default()
        }
    }
}

/// A complete bytecode program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BytecodeProgram {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    /// Insertion-ordered so serialization is deterministic.
    pub functions: IndexMap<String, FunctionEntry>,
    /// Host-provided bindings seeded into the VM globals on load. Not
    /// part of the REAP format.
    pub globals: IndexMap<String, Constant>,
}

impl BytecodeProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction and return its index.
    pub fn add_instruction(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Add a constant to the pool and return its index.
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        if let Some(index) = self.constants.iter().position(|c| c == &constant) {
            return index;
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    pub fn add_function(&mut self, name: impl Into<String>, entry: FunctionEntry) {
        self.functions.insert(name.into(), entry);
    }

    pub fn add_global(&mut self, name: impl Into<String>, value: Constant) {
        self.globals.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Rebuild parameter lists from the function prologues. Used after
    /// loading a program whose function table only carries entry points.
    ///
    /// A prologue is one `STORE_LOCAL p` per parameter, optionally followed
    /// by the default-value guard that starts with `PUSH_LOCAL $argc` and
    /// ends at its `JMP_IF_NOT` target.
    pub fn recover_parameters(&mut self) {
        let entries: Vec<(String, usize)> = self
            .functions
            .iter()
            .map(|(name, f)| (name.clone(), f.entry))
            .collect();
        for (name, entry) in entries {
            let (params, defaults) = self.scan_prologue(entry);
            if let Some(function) = self.functions.get_mut(&name) {
                function.params = params;
                function.defaults = defaults;
            }
        }
    }

    fn scan_prologue(&self, entry: usize) -> (Vec<String>, Vec<bool>) {
        let mut params = Vec::new();
        let mut defaults = Vec::new();
        let mut pc = entry;
        while let Some(instruction) = self.instructions.get(pc) {
            let Some(name) = instruction.operand.as_text() else {
                break;
            };
            if instruction.opcode != OpCode::StoreLocal || name == ARGC_LOCAL {
                break;
            }
            params.push(name.to_string());
            defaults.push(false);
            pc += 1;

            if self.is_default_guard(pc) {
                let skip = self
                    .instructions
                    .get(pc + 3)
                    .and_then(Instruction::jump_target);
                match skip {
                    Some(target) if target > pc => {
                        if let Some(last) = defaults.last_mut() {
                            *last = true;
                        }
                        pc = target;
                    }
                    _ => break,
                }
            }
        }
        (params, defaults)
    }

    fn is_default_guard(&self, pc: usize) -> bool {
        let opcode = |offset: usize| self.instructions.get(pc + offset).map(|i| i.opcode);
        let reads_argc = self
            .instructions
            .get(pc)
            .map(|i| i.opcode == OpCode::PushLocal && i.operand == Operand::Text(ARGC_LOCAL.into()))
            .unwrap_or(false);
        reads_argc
            && opcode(1) == Some(OpCode::PushConst)
            && opcode(2) == Some(OpCode::Lt)
            && opcode(3) == Some(OpCode::JmpIfNot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn op(opcode: OpCode, operand: Operand) -> Instruction {
        Instruction::with_operand(opcode, operand, Span::default())
    }

    #[test]
    fn test_constants_are_pooled() {
        let mut program = BytecodeProgram::new();
        let a = program.add_constant(Constant::Int(7));
        let b = program.add_constant(Constant::Text("7".into()));
        let c = program.add_constant(Constant::Int(7));
        assert_eq!(a, c);
        assert_ne!(a, b);
        let zero = program.add_constant(Constant::Float(0.0));
        let negative_zero = program.add_constant(Constant::Float(-0.0));
        assert_ne!(zero, negative_zero);
    }

    #[test]
    fn test_recover_parameters_from_prologue() {
        let mut program = BytecodeProgram::new();
        let one = program.add_constant(Constant::Int(2)) as i64;
        let hail = program.add_constant(Constant::Text("Hail".into())) as i64;
        let text = |s: &str| Operand::Text(s.to_string());
        program.instructions = vec![
            op(OpCode::StoreLocal, text("name")),
            op(OpCode::StoreLocal, text("greeting")),
            op(OpCode::PushLocal, text(ARGC_LOCAL)),
            op(OpCode::PushConst, Operand::Int(one)),
            op(OpCode::Lt, Operand::None),
            op(OpCode::JmpIfNot, Operand::Int(8)),
            op(OpCode::PushConst, Operand::Int(hail)),
            op(OpCode::StoreLocal, text("greeting")),
            op(OpCode::PushLocal, text("greeting")),
            op(OpCode::Return, Operand::None),
        ];
        program.add_function("greet", FunctionEntry::new(0));
        program.recover_parameters();
        let greet = &program.functions["greet"];
        assert_eq!(greet.params, vec!["name".to_string(), "greeting".to_string()]);
        assert_eq!(greet.defaults, vec![false, true]);
    }
}
