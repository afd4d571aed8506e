//! Bytecode disassembler for debugging.

use std::fmt;

use crate::bytecode::instruction::{Instruction, OpCode};
use crate::bytecode::program::BytecodeProgram;

/// Human-readable listing of a whole program.
pub fn disassemble(program: &BytecodeProgram) -> String {
    Disassembly(program).to_string()
}

/// Print a program listing to stdout.
pub fn print_disassembly(program: &BytecodeProgram) {
    print!("{}", Disassembly(program));
}

/// Display adapter: constant pool, function table, then one line per
/// instruction with its source line (`|` when unchanged).
pub struct Disassembly<'a>(pub &'a BytecodeProgram);

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.0;
        writeln!(f, "== constants ({}) ==", program.constants.len())?;
        for (index, constant) in program.constants.iter().enumerate() {
            writeln!(f, "  [{:3}] {}", index, constant)?;
        }

        writeln!(f, "== functions ({}) ==", program.functions.len())?;
        for (name, function) in &program.functions {
            writeln!(
                f,
                "  {} @ {:04} ({})",
                name,
                function.entry,
                function.params.join(", ")
            )?;
        }

        writeln!(f, "== code ({}) ==", program.instructions.len())?;
        let mut previous_line = None;
        for (offset, instruction) in program.instructions.iter().enumerate() {
            for (name, _) in program.functions.iter().filter(|(_, func)| func.entry == offset) {
                writeln!(f, "<{}>:", name)?;
            }
            let line = instruction.span.line;
            if previous_line == Some(line) {
                write!(f, "{:04}    | ", offset)?;
            } else {
                write!(f, "{:04} {:4} ", offset, line)?;
            }
            previous_line = Some(line);
            write_instruction(f, program, instruction)?;
        }
        Ok(())
    }
}

fn write_instruction(
    f: &mut fmt::Formatter<'_>,
    program: &BytecodeProgram,
    instruction: &Instruction,
) -> fmt::Result {
    write!(f, "{:<14}", instruction.opcode.name())?;
    match instruction.opcode {
        OpCode::PushConst => {
            let constant = instruction
                .operand
                .as_int()
                .and_then(|index| usize::try_from(index).ok())
                .and_then(|index| program.constants.get(index));
            match constant {
                Some(constant) => writeln!(f, " {:4} '{}'", instruction.operand, constant),
                None => writeln!(f, " {:4} <bad constant>", instruction.operand),
            }
        }
        op if op.is_jump() => writeln!(f, " -> {}", instruction.operand),
        _ => writeln!(f, " {}", instruction.operand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compiler::Compiler;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn disassemble_source(source: &str) -> String {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        disassemble(&Compiler::new().compile(&program).unwrap())
    }

    #[test]
    fn test_disassemble_simple() {
        let output = disassemble_source("harvest 1 + 2;");
        assert!(output.contains("PUSH_CONST"));
        assert!(output.contains("'3'"));
        assert!(output.contains("CALL_BUILTIN"));
        assert!(output.contains("\"harvest\""));
    }

    #[test]
    fn test_disassemble_function() {
        let output = disassemble_source("infect add(corpse a, corpse b) { reap a + b; } add(1, 2);");
        assert!(output.contains("add @ "));
        assert!(output.contains("(a, b)"));
        assert!(output.contains("<add>:"));
        assert!(output.contains("RETURN"));
        assert!(output.contains("JMP"));
        assert!(output.contains("-> "));
    }
}
