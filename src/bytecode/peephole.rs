//! Single-pass peephole optimizer.
//!
//! Rewrites `DUP; POP` and `PUSH_CONST; POP` to nothing, folds
//! `PUSH_CONST a; PUSH_CONST b; <binary op>` into one constant and drops
//! a `JMP` to the very next instruction. A pattern is left alone when a
//! jump lands inside it. Jump targets and function entries are remapped
//! afterwards.

use std::collections::HashSet;

use tracing::trace;

use crate::bytecode::instruction::{Instruction, OpCode, Operand};
use crate::bytecode::program::{BytecodeProgram, Constant};
use crate::bytecode::vm::eval_binary;

/// Optimize in place and return the number of instructions removed.
pub fn optimize(program: &mut BytecodeProgram) -> usize {
    let targets = jump_targets(program);
    let old = std::mem::take(&mut program.instructions);
    let mut rewritten: Vec<Instruction> = Vec::with_capacity(old.len());
    // Old index -> new index; one extra slot for "end of program".
    let mut remap = vec![0usize; old.len() + 1];

    let mut i = 0;
    while i < old.len() {
        let next = old.get(i + 1).map(|inst| inst.opcode);
        let free = |k: usize| !targets.contains(&(i + k));

        if matches!(old[i].opcode, OpCode::Dup | OpCode::PushConst)
            && next == Some(OpCode::Pop)
            && free(1)
        {
            remap[i] = rewritten.len();
            remap[i + 1] = rewritten.len();
            trace!(at = i, "dropped push/pop pair");
            i += 2;
            continue;
        }

        if free(1) && free(2) {
            if let Some(folded) = fold_triple(program, &old, i) {
                remap[i] = rewritten.len();
                remap[i + 1] = rewritten.len();
                remap[i + 2] = rewritten.len();
                rewritten.push(folded);
                trace!(at = i, "folded constant operation");
                i += 3;
                continue;
            }
        }

        if old[i].opcode == OpCode::Jmp && old[i].jump_target() == Some(i + 1) {
            remap[i] = rewritten.len();
            i += 1;
            continue;
        }

        remap[i] = rewritten.len();
        rewritten.push(old[i].clone());
        i += 1;
    }
    remap[old.len()] = rewritten.len();

    for instruction in &mut rewritten {
        if let Some(target) = instruction.jump_target() {
            if let Some(mapped) = remap.get(target) {
                instruction.operand = Operand::Int(*mapped as i64);
            }
        }
    }
    for function in program.functions.values_mut() {
        if let Some(mapped) = remap.get(function.entry) {
            function.entry = *mapped;
        }
    }

    let removed = old.len() - rewritten.len();
    program.instructions = rewritten;
    removed
}

fn jump_targets(program: &BytecodeProgram) -> HashSet<usize> {
    program
        .instructions
        .iter()
        .filter_map(Instruction::jump_target)
        .chain(program.functions.values().map(|f| f.entry))
        .collect()
}

fn constant_at(program: &BytecodeProgram, instruction: &Instruction) -> Option<Constant> {
    if instruction.opcode != OpCode::PushConst {
        return None;
    }
    let index = usize::try_from(instruction.operand.as_int()?).ok()?;
    program.constants.get(index).cloned()
}

fn fold_triple(
    program: &mut BytecodeProgram,
    instructions: &[Instruction],
    at: usize,
) -> Option<Instruction> {
    let op = instructions.get(at + 2)?;
    if !op.opcode.is_foldable_binary() {
        return None;
    }
    let left = constant_at(program, instructions.get(at)?)?;
    let right = constant_at(program, instructions.get(at + 1)?)?;
    let value = eval_binary(op.opcode, &left.to_value(), &right.to_value(), op.span).ok()?;
    let constant = Constant::from_value(&value)?;
    let index = program.add_constant(constant);
    Some(Instruction::with_operand(
        OpCode::PushConst,
        Operand::Int(index as i64),
        instructions[at].span,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::program::FunctionEntry;
    use crate::span::Span;
    use pretty_assertions::assert_eq;

    fn op(opcode: OpCode) -> Instruction {
        Instruction::new(opcode, Span::default())
    }

    fn op_with(opcode: OpCode, operand: Operand) -> Instruction {
        Instruction::with_operand(opcode, operand, Span::default())
    }

    #[test]
    fn test_folds_constant_arithmetic() {
        let mut program = BytecodeProgram::new();
        let two = program.add_constant(Constant::Int(2)) as i64;
        let three = program.add_constant(Constant::Int(3)) as i64;
        program.instructions = vec![
            op_with(OpCode::PushConst, Operand::Int(two)),
            op_with(OpCode::PushConst, Operand::Int(three)),
            op(OpCode::Mul),
        ];
        assert_eq!(optimize(&mut program), 2);
        assert_eq!(program.instructions.len(), 1);
        let index = program.instructions[0].operand.as_int().unwrap() as usize;
        assert_eq!(program.constants[index], Constant::Int(6));
    }

    #[test]
    fn test_keeps_failing_fold() {
        let mut program = BytecodeProgram::new();
        let one = program.add_constant(Constant::Int(1)) as i64;
        let zero = program.add_constant(Constant::Int(0)) as i64;
        program.instructions = vec![
            op_with(OpCode::PushConst, Operand::Int(one)),
            op_with(OpCode::PushConst, Operand::Int(zero)),
            op(OpCode::Div),
        ];
        assert_eq!(optimize(&mut program), 0);
    }

    #[test]
    fn test_remaps_jump_targets() {
        let mut program = BytecodeProgram::new();
        let c = program.add_constant(Constant::Int(1)) as i64;
        program.instructions = vec![
            op_with(OpCode::PushConst, Operand::Int(c)),
            op(OpCode::Pop),
            op_with(OpCode::Jmp, Operand::Int(3)),
            op_with(OpCode::PushConst, Operand::Int(c)),
            op_with(OpCode::JmpIf, Operand::Int(6)),
            op(OpCode::Dup),
            op(OpCode::Return),
        ];
        program.add_function("f", FunctionEntry::new(5));
        assert_eq!(optimize(&mut program), 3);
        assert_eq!(
            program.instructions,
            vec![
                op_with(OpCode::PushConst, Operand::Int(c)),
                op_with(OpCode::JmpIf, Operand::Int(3)),
                op(OpCode::Dup),
                op(OpCode::Return),
            ]
        );
        assert_eq!(program.functions["f"].entry, 2);
    }

    #[test]
    fn test_jump_target_blocks_rewrite() {
        let mut program = BytecodeProgram::new();
        program.instructions = vec![
            op_with(OpCode::JmpIf, Operand::Int(2)),
            op(OpCode::Dup),
            op(OpCode::Pop),
        ];
        assert_eq!(optimize(&mut program), 0);
        assert_eq!(program.instructions[0].jump_target(), Some(2));
    }
}
