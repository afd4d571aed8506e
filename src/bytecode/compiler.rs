//! Bytecode compiler: lowers the AST to stack code.
//!
//! Top-level bindings become VM globals and function bodies use frame
//! locals. Names declared in nested blocks are renamed `name@N`, so the
//! flat VM namespaces still see block scoping. Loop counters and other
//! hidden temporaries are named with a leading `$`, which the lexer never
//! produces.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, FunctionDecl, InterpolatedPart, LogicalOp, Program,
    Stmt, StmtKind, TypeTag, UnaryOp,
};
use crate::bytecode::instruction::{Instruction, OpCode, Operand};
use crate::bytecode::peephole;
use crate::bytecode::program::{BytecodeProgram, Constant, FunctionEntry, ARGC_LOCAL};
use crate::error::CompileError;
use crate::interpreter::builtins::Builtin;
use crate::interpreter::ops;
use crate::interpreter::value::Value;
use crate::span::Span;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Local,
    Global,
}

/// Where a source name lives at runtime.
#[derive(Debug, Clone)]
struct Slot {
    storage: Storage,
    name: String,
    constant: bool,
}

#[derive(Debug, Default)]
struct Scope {
    names: HashMap<String, Slot>,
    /// The program root or a function body: declarations keep their name.
    root: bool,
}

/// Pending `flee` / `persist` jumps of the innermost loop.
#[derive(Debug, Default)]
struct LoopContext {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// The bytecode compiler.
pub struct Compiler {
    program: BytecodeProgram,
    scopes: Vec<Scope>,
    loops: Vec<LoopContext>,
    /// Names assigned directly at the top level; an assignment to one of
    /// these from a nested scope writes the global.
    globals: HashSet<String>,
    function_depth: usize,
    counter: usize,
    span: Span,
    optimize: bool,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            program: BytecodeProgram::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            globals: HashSet::new(),
            function_depth: 0,
            counter: 0,
            span: Span::default(),
            optimize: true,
        }
    }

    /// Toggle the peephole pass (on by default).
    pub fn with_peephole(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    /// Compile a whole program. The value of a trailing expression
    /// statement stays on the stack as the program's result.
    #[instrument(level = "debug", skip_all)]
    pub fn compile(&mut self, program: &Program) -> CompileResult<BytecodeProgram> {
        self.program = BytecodeProgram::new();
        self.scopes = vec![Scope {
            root: true,
            ..Scope::default()
        }];
        self.loops.clear();
        self.function_depth = 0;
        self.counter = 0;
        self.globals = top_level_names(&program.statements);

        let last = program.statements.len().checked_sub(1);
        for (index, stmt) in program.statements.iter().enumerate() {
            match &stmt.kind {
                StmtKind::Expression(expr) if Some(index) == last => {
                    self.compile_expression(expr)?;
                }
                _ => self.compile_statement(stmt)?,
            }
        }

        let mut compiled = std::mem::take(&mut self.program);
        if self.optimize {
            let removed = peephole::optimize(&mut compiled);
            debug!(removed, "peephole pass");
        }
        debug!(
            instructions = compiled.instructions.len(),
            constants = compiled.constants.len(),
            functions = compiled.functions.len(),
            "compiled program"
        );
        Ok(compiled)
    }

    fn compile_statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let outer = std::mem::replace(&mut self.span, stmt.span);
        let result = self.compile_statement_kind(stmt);
        self.span = outer;
        result
    }

    fn compile_statement_kind(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expression(expr)?;
                self.emit(OpCode::Pop);
            }

            StmtKind::VarDecl {
                name,
                type_tag,
                initializer,
                is_constant,
            } => {
                match initializer {
                    Some(init) => self.compile_expression(init)?,
                    None => self.emit_constant(Constant::None),
                }
                if *type_tag == TypeTag::Shadow {
                    self.emit(OpCode::SecureString);
                }
                let slot = self.declare(name, *is_constant);
                self.emit_store(&slot);
            }

            StmtKind::Block(statements) => {
                self.with_block(|this| this.compile_statements(statements))?;
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expression(condition)?;
                let then_jump = self.emit_jump(OpCode::JmpIfNot);
                self.compile_statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end_jump = self.emit_jump(OpCode::Jmp);
                        self.patch_jump(then_jump);
                        self.compile_statement(else_branch)?;
                        self.patch_jump(end_jump);
                    }
                    None => self.patch_jump(then_jump),
                }
            }

            StmtKind::Shamble {
                variable,
                start,
                end,
                body,
            } => self.compile_shamble(variable, start, end, body)?,

            StmtKind::Decay {
                variable,
                iterable,
                body,
            } => self.compile_decay(variable, iterable, body)?,

            StmtKind::Soulless(body) => {
                let loop_start = self.current_offset();
                self.loops.push(LoopContext::default());
                let outcome = self.compile_statement(body);
                let context = self.loops.pop().unwrap_or_default();
                outcome?;
                self.emit_jump_to(OpCode::Jmp, loop_start);
                let exit = self.current_offset();
                self.close_loop(context, loop_start, exit);
            }

            StmtKind::Judge {
                subject,
                cases,
                default,
            } => {
                self.compile_expression(subject)?;
                let judge = self.temp("judge");
                self.emit_store(&judge);
                let mut end_jumps = Vec::new();
                for case in cases {
                    self.emit_load(&judge);
                    self.compile_expression(&case.value)?;
                    self.emit(OpCode::Eq);
                    let next = self.emit_jump(OpCode::JmpIfNot);
                    self.with_block(|this| this.compile_statements(&case.body))?;
                    end_jumps.push(self.emit_jump(OpCode::Jmp));
                    self.patch_jump(next);
                }
                if let Some(default) = default {
                    self.with_block(|this| this.compile_statements(default))?;
                }
                for jump in end_jumps {
                    self.patch_jump(jump);
                }
            }

            StmtKind::Flee => {
                let jump = self.emit_jump(OpCode::Jmp);
                match self.loops.last_mut() {
                    Some(context) => context.breaks.push(jump),
                    None => return Err(CompileError::new("'flee' outside of a loop", stmt.span)),
                }
            }

            StmtKind::Persist => {
                let jump = self.emit_jump(OpCode::Jmp);
                match self.loops.last_mut() {
                    Some(context) => context.continues.push(jump),
                    None => {
                        return Err(CompileError::new("'persist' outside of a loop", stmt.span))
                    }
                }
            }

            StmtKind::Reap(value) => {
                match value {
                    Some(value) => self.compile_expression(value)?,
                    None => self.emit_constant(Constant::None),
                }
                self.emit(OpCode::Return);
            }

            StmtKind::Harvest(args) => {
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.emit_call_builtin(Builtin::Harvest.name(), args.len());
                self.emit(OpCode::Pop);
            }

            StmtKind::Rest(duration) => {
                self.compile_expression(duration)?;
                self.emit_call_builtin(Builtin::Rest.name(), 1);
                self.emit(OpCode::Pop);
            }

            StmtKind::Function(decl) => self.compile_function(decl)?,

            StmtKind::Class(_) => return Err(CompileError::unsupported("tomb", stmt.span)),
            StmtKind::Risk { .. } => return Err(CompileError::unsupported("risk", stmt.span)),
            StmtKind::Throw { .. } => return Err(CompileError::unsupported("throw", stmt.span)),
            StmtKind::Infiltrate(_) => {
                return Err(CompileError::unsupported("infiltrate", stmt.span))
            }
            StmtKind::Cloak(_) => return Err(CompileError::unsupported("cloak", stmt.span)),
        }
        Ok(())
    }

    fn compile_statements(&mut self, statements: &[Stmt]) -> CompileResult<()> {
        for stmt in statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    /// `shamble v from a to b`: inclusive, and the counter is only bumped
    /// after checking it is below the bound, so `b = i64::MAX` terminates.
    fn compile_shamble(
        &mut self,
        variable: &str,
        start: &Expr,
        end: &Expr,
        body: &Stmt,
    ) -> CompileResult<()> {
        let current = self.temp("cur");
        let bound = self.temp("end");
        self.compile_expression(start)?;
        self.emit_with(OpCode::TypeCheck, Operand::Text("corpse".into()));
        self.emit_store(&current);
        self.compile_expression(end)?;
        self.emit_with(OpCode::TypeCheck, Operand::Text("corpse".into()));
        self.emit_store(&bound);
        let target = self.assignment_slot(variable)?;

        let loop_start = self.current_offset();
        self.emit_load(&current);
        self.emit_load(&bound);
        self.emit(OpCode::Le);
        let mut exits = vec![self.emit_jump(OpCode::JmpIfNot)];
        self.emit_load(&current);
        self.emit_store(&target);

        self.loops.push(LoopContext::default());
        let outcome = self.compile_statement(body);
        let context = self.loops.pop().unwrap_or_default();
        outcome?;

        let step = self.current_offset();
        self.emit_load(&current);
        self.emit_load(&bound);
        self.emit(OpCode::Lt);
        exits.push(self.emit_jump(OpCode::JmpIfNot));
        self.emit_load(&current);
        self.emit(OpCode::Inc);
        self.emit_store(&current);
        self.emit_jump_to(OpCode::Jmp, loop_start);

        let exit = self.current_offset();
        for jump in exits {
            self.patch_jump_to(jump, exit);
        }
        self.close_loop(context, step, exit);
        Ok(())
    }

    /// `decay v in xs`: iterates a snapshot of the items.
    fn compile_decay(&mut self, variable: &str, iterable: &Expr, body: &Stmt) -> CompileResult<()> {
        let items = self.temp("iter");
        let index = self.temp("idx");
        self.compile_expression(iterable)?;
        self.emit_with(OpCode::TypeConvert, Operand::Text("iter".into()));
        self.emit_store(&items);
        self.emit_constant(Constant::Int(0));
        self.emit_store(&index);
        let target = self.assignment_slot(variable)?;

        let loop_start = self.current_offset();
        let exit_jump = self.emit_iteration_step(&items, &index);
        self.emit_store(&target);

        self.loops.push(LoopContext::default());
        let outcome = self.compile_statement(body);
        let context = self.loops.pop().unwrap_or_default();
        outcome?;
        self.emit_jump_to(OpCode::Jmp, loop_start);

        let exit = self.current_offset();
        self.patch_jump_to(exit_jump, exit);
        self.close_loop(context, loop_start, exit);
        Ok(())
    }

    /// Bounds check, then push `items[index]` and advance the index.
    /// Returns the exit jump to patch.
    fn emit_iteration_step(&mut self, items: &Slot, index: &Slot) -> usize {
        self.emit_load(index);
        self.emit_load(items);
        self.emit(OpCode::ArrayLen);
        self.emit(OpCode::Lt);
        let exit_jump = self.emit_jump(OpCode::JmpIfNot);
        self.emit_load(items);
        self.emit_load(index);
        self.emit(OpCode::ArrayGet);
        self.emit_load(index);
        self.emit(OpCode::Inc);
        self.emit_store(index);
        exit_jump
    }

    fn close_loop(&mut self, context: LoopContext, continue_target: usize, exit: usize) {
        for jump in context.breaks {
            self.patch_jump_to(jump, exit);
        }
        for jump in context.continues {
            self.patch_jump_to(jump, continue_target);
        }
    }

    /// Emit the body in place behind a jump. Parameters are bound by
    /// `STORE_LOCAL` in declaration order; a defaulted parameter is then
    /// overwritten when the caller passed fewer arguments.
    fn compile_function(&mut self, decl: &FunctionDecl) -> CompileResult<()> {
        if self.function_depth > 0 {
            return Err(CompileError::unsupported("nested infect", decl.span));
        }
        // The function table is global, so only top-level declarations
        // keep the interpreter's scoping.
        if self.scopes.len() > 1 {
            return Err(CompileError::unsupported("block-scoped infect", decl.span));
        }
        let skip = self.emit_jump(OpCode::Jmp);
        let entry = self.current_offset();
        self.program.add_function(
            decl.name.clone(),
            FunctionEntry {
                entry,
                params: decl.params.iter().map(|p| p.name.clone()).collect(),
                defaults: decl.params.iter().map(|p| p.default_value.is_some()).collect(),
            },
        );

        self.function_depth += 1;
        self.scopes.push(Scope {
            root: true,
            ..Scope::default()
        });
        let outer_loops = std::mem::take(&mut self.loops);
        let outcome = self.compile_function_body(decl);
        self.loops = outer_loops;
        self.scopes.pop();
        self.function_depth -= 1;
        outcome?;

        self.patch_jump(skip);
        debug!(function = %decl.name, entry, "compiled function");
        Ok(())
    }

    fn compile_function_body(&mut self, decl: &FunctionDecl) -> CompileResult<()> {
        for (position, param) in decl.params.iter().enumerate() {
            let slot = self.declare(&param.name, false);
            self.emit_store(&slot);
            if let Some(default) = &param.default_value {
                self.emit_with(OpCode::PushLocal, Operand::Text(ARGC_LOCAL.into()));
                self.emit_constant(Constant::Int(position as i64 + 1));
                self.emit(OpCode::Lt);
                let supplied = self.emit_jump(OpCode::JmpIfNot);
                self.compile_expression(default)?;
                self.emit_store(&slot);
                self.patch_jump(supplied);
            }
        }
        self.compile_statements(&decl.body)?;
        self.emit_constant(Constant::None);
        self.emit(OpCode::Return);
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expr) -> CompileResult<()> {
        let outer = std::mem::replace(&mut self.span, expr.span);
        let result = self.compile_expression_kind(expr);
        self.span = outer;
        result
    }

    fn compile_expression_kind(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::IntLiteral(n) => self.emit_constant(Constant::Int(*n)),
            ExprKind::FloatLiteral(n) => self.emit_constant(Constant::Float(*n)),
            ExprKind::StringLiteral(s) => self.emit_constant(Constant::Text(s.clone())),
            ExprKind::Void => self.emit_constant(Constant::None),

            ExprKind::InterpolatedString(parts) => {
                self.emit_constant(Constant::Text(String::new()));
                for part in parts {
                    match part {
                        InterpolatedPart::Literal(text) => {
                            self.emit_constant(Constant::Text(text.clone()))
                        }
                        InterpolatedPart::Expression(inner) => self.compile_expression(inner)?,
                    }
                    self.emit(OpCode::StrConcat);
                }
            }

            ExprKind::Variable(name) => {
                let slot = self.resolve(name);
                self.emit_load(&slot);
            }

            ExprKind::Binary {
                left,
                operator,
                right,
            } => {
                if let Some(constant) = fold_constant(expr).as_ref().and_then(Constant::from_value) {
                    self.emit_constant(constant);
                } else {
                    self.compile_expression(left)?;
                    self.compile_expression(right)?;
                    self.emit(binary_opcode(*operator));
                }
            }

            ExprKind::Logical {
                left,
                operator,
                right,
            } => self.compile_logical(left, *operator, right)?,

            ExprKind::Unary { operator, operand } => {
                if let Some(constant) = fold_constant(expr).as_ref().and_then(Constant::from_value) {
                    self.emit_constant(constant);
                } else {
                    self.compile_expression(operand)?;
                    self.emit(match operator {
                        UnaryOp::Negate => OpCode::Neg,
                        UnaryOp::Not => OpCode::LogNot,
                        UnaryOp::BitNot => OpCode::BitNot,
                    });
                }
            }

            ExprKind::Call { callee, arguments } => {
                let ExprKind::Variable(name) = &callee.kind else {
                    return Err(CompileError::unsupported("indirect call", expr.span));
                };
                for arg in arguments {
                    self.compile_expression(arg)?;
                }
                self.emit_constant(Constant::Int(arguments.len() as i64));
                let opcode = if Builtin::from_name(name).is_some() {
                    OpCode::CallBuiltin
                } else {
                    OpCode::Call
                };
                self.emit_with(opcode, Operand::Text(name.clone()));
            }

            ExprKind::MethodCall {
                object,
                method,
                arguments,
            } => {
                self.compile_expression(object)?;
                for arg in arguments {
                    self.compile_expression(arg)?;
                }
                self.emit_call_builtin(&format!(".{}", method), arguments.len() + 1);
            }

            ExprKind::Member { object, name } => {
                self.compile_expression(object)?;
                self.emit_call_builtin(&format!("@{}", name), 1);
            }

            ExprKind::Index { object, index } => {
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                self.emit(OpCode::ArrayGet);
            }

            ExprKind::Slice {
                object,
                start,
                end,
                step,
            } => {
                self.compile_expression(object)?;
                for bound in [start, end, step] {
                    match bound {
                        Some(bound) => self.compile_expression(bound)?,
                        None => self.emit_constant(Constant::None),
                    }
                }
                self.emit_call_builtin("$slice", 4);
            }

            ExprKind::Assign {
                target,
                operator,
                value,
            } => self.compile_assignment(target, *operator, value)?,

            ExprKind::Array(items) => {
                for item in items {
                    self.compile_expression(item)?;
                }
                self.emit_with(OpCode::ArrayNew, Operand::Int(items.len() as i64));
            }

            ExprKind::Dict(pairs) => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit_with(OpCode::DictNew, Operand::Int(pairs.len() as i64));
            }

            ExprKind::ListComprehension {
                element,
                variable,
                iterable,
                condition,
            } => self.compile_comprehension(element, variable, iterable, condition.as_deref())?,

            ExprKind::This => return Err(CompileError::unsupported("this", expr.span)),
            ExprKind::Lambda { .. } => return Err(CompileError::unsupported("lambda", expr.span)),
            ExprKind::Spawn { .. } => return Err(CompileError::unsupported("spawn", expr.span)),
            ExprKind::Breach(_) => return Err(CompileError::unsupported("breach", expr.span)),
            ExprKind::Await(_) => return Err(CompileError::unsupported("await", expr.span)),
        }
        Ok(())
    }

    /// Short-circuit: the right operand only runs when it decides the
    /// result. Either way the result is a wraith.
    fn compile_logical(&mut self, left: &Expr, operator: LogicalOp, right: &Expr) -> CompileResult<()> {
        let (decided_on, decided) = match operator {
            LogicalOp::And => (OpCode::JmpIfNot, false),
            LogicalOp::Or => (OpCode::JmpIf, true),
        };
        self.compile_expression(left)?;
        let short_circuit = self.emit_jump(decided_on);
        self.compile_expression(right)?;
        let right_false = self.emit_jump(OpCode::JmpIfNot);
        self.emit_constant(Constant::Bool(true));
        let done = self.emit_jump(OpCode::Jmp);
        self.patch_jump(right_false);
        self.emit_constant(Constant::Bool(false));
        let after_right = self.emit_jump(OpCode::Jmp);
        self.patch_jump(short_circuit);
        self.emit_constant(Constant::Bool(decided));
        self.patch_jump(done);
        self.patch_jump(after_right);
        Ok(())
    }

    fn compile_comprehension(
        &mut self,
        element: &Expr,
        variable: &str,
        iterable: &Expr,
        condition: Option<&Expr>,
    ) -> CompileResult<()> {
        let accumulator = self.temp("acc");
        let items = self.temp("iter");
        let index = self.temp("idx");
        self.emit_with(OpCode::ArrayNew, Operand::Int(0));
        self.emit_store(&accumulator);
        self.compile_expression(iterable)?;
        self.emit_with(OpCode::TypeConvert, Operand::Text("iter".into()));
        self.emit_store(&items);
        self.emit_constant(Constant::Int(0));
        self.emit_store(&index);

        self.with_block(|this| {
            let bound = this.declare(variable, false);
            let loop_start = this.current_offset();
            let exit_jump = this.emit_iteration_step(&items, &index);
            this.emit_store(&bound);
            if let Some(condition) = condition {
                this.compile_expression(condition)?;
                this.emit_jump_to(OpCode::JmpIfNot, loop_start);
            }
            this.emit_load(&accumulator);
            this.compile_expression(element)?;
            this.emit_call_builtin(".entomb", 2);
            this.emit(OpCode::Pop);
            this.emit_jump_to(OpCode::Jmp, loop_start);
            this.patch_jump(exit_jump);
            Ok(())
        })?;
        self.emit_load(&accumulator);
        Ok(())
    }

    /// Every assignment form leaves the assigned value on the stack.
    fn compile_assignment(&mut self, target: &Expr, operator: AssignOp, value: &Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                let slot = match operator.binary_op() {
                    None => self.assignment_slot(name)?,
                    Some(_) => self.resolve(name),
                };
                if slot.constant {
                    return Err(CompileError::new(
                        format!("Cannot modify constant '{}'", name),
                        target.span,
                    ));
                }
                if let Some(op) = operator.binary_op() {
                    self.emit_load(&slot);
                    self.compile_expression(value)?;
                    self.emit(binary_opcode(op));
                } else {
                    self.compile_expression(value)?;
                }
                self.emit(OpCode::Dup);
                self.emit_store(&slot);
            }

            ExprKind::Member { object, name } => {
                self.compile_expression(object)?;
                if let Some(op) = operator.binary_op() {
                    self.emit(OpCode::Dup);
                    self.emit_call_builtin(&format!("@{}", name), 1);
                    self.compile_expression(value)?;
                    self.emit(binary_opcode(op));
                } else {
                    self.compile_expression(value)?;
                }
                self.emit_call_builtin(&format!("@{}=", name), 2);
            }

            ExprKind::Index { object, index } => {
                let container = self.temp("a");
                let key = self.temp("b");
                let result = self.temp("c");
                self.compile_expression(object)?;
                self.emit_store(&container);
                self.compile_expression(index)?;
                self.emit_store(&key);
                if let Some(op) = operator.binary_op() {
                    self.emit_load(&container);
                    self.emit_load(&key);
                    self.emit(OpCode::ArrayGet);
                    self.compile_expression(value)?;
                    self.emit(binary_opcode(op));
                } else {
                    self.compile_expression(value)?;
                }
                self.emit_store(&result);
                self.emit_load(&container);
                self.emit_load(&key);
                self.emit_load(&result);
                self.emit(OpCode::ArraySet);
                self.emit(OpCode::Pop);
                self.emit_load(&result);
            }

            _ => return Err(CompileError::new("Invalid assignment target", target.span)),
        }
        Ok(())
    }

    fn with_block(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<()>) -> CompileResult<()> {
        self.scopes.push(Scope::default());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn storage(&self) -> Storage {
        if self.function_depth > 0 {
            Storage::Local
        } else {
            Storage::Global
        }
    }

    fn resolve(&self, name: &str) -> Slot {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(name).cloned())
            .unwrap_or_else(|| Slot {
                storage: Storage::Global,
                name: name.to_string(),
                constant: false,
            })
    }

    /// Bind `name` in the innermost scope.
    fn declare(&mut self, name: &str, constant: bool) -> Slot {
        let storage = self.storage();
        let root = self.scopes.last().map_or(true, |scope| scope.root);
        let runtime_name = if root {
            name.to_string()
        } else {
            self.counter += 1;
            format!("{}@{}", name, self.counter)
        };
        let slot = Slot {
            storage,
            name: runtime_name,
            constant,
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.to_string(), slot.clone());
        }
        slot
    }

    /// Target of a plain assignment: an existing binding, a top-level
    /// global, or else a new binding in the current scope.
    fn assignment_slot(&mut self, name: &str) -> CompileResult<Slot> {
        if let Some(slot) = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(name).cloned())
        {
            if slot.constant {
                return Err(CompileError::new(
                    format!("Cannot modify constant '{}'", name),
                    self.span,
                ));
            }
            return Ok(slot);
        }
        if self.globals.contains(name) {
            return Ok(Slot {
                storage: Storage::Global,
                name: name.to_string(),
                constant: false,
            });
        }
        Ok(self.declare(name, false))
    }

    /// A hidden temporary, unique per use site.
    fn temp(&mut self, prefix: &str) -> Slot {
        self.counter += 1;
        Slot {
            storage: self.storage(),
            name: format!("${}{}", prefix, self.counter),
            constant: false,
        }
    }

    fn emit(&mut self, opcode: OpCode) {
        self.program
            .add_instruction(Instruction::new(opcode, self.span));
    }

    fn emit_with(&mut self, opcode: OpCode, operand: Operand) {
        self.program
            .add_instruction(Instruction::with_operand(opcode, operand, self.span));
    }

    fn emit_constant(&mut self, constant: Constant) {
        let index = self.program.add_constant(constant);
        self.emit_with(OpCode::PushConst, Operand::Int(index as i64));
    }

    fn emit_load(&mut self, slot: &Slot) {
        let opcode = match slot.storage {
            Storage::Local => OpCode::PushLocal,
            Storage::Global => OpCode::PushGlobal,
        };
        self.emit_with(opcode, Operand::Text(slot.name.clone()));
    }

    fn emit_store(&mut self, slot: &Slot) {
        let opcode = match slot.storage {
            Storage::Local => OpCode::StoreLocal,
            Storage::Global => OpCode::StoreGlobal,
        };
        self.emit_with(opcode, Operand::Text(slot.name.clone()));
    }

    fn emit_call_builtin(&mut self, name: &str, argc: usize) {
        self.emit_constant(Constant::Int(argc as i64));
        self.emit_with(OpCode::CallBuiltin, Operand::Text(name.to_string()));
    }

    /// Emit a jump with a placeholder target and return its index.
    fn emit_jump(&mut self, opcode: OpCode) -> usize {
        self.emit_with(opcode, Operand::Int(-1));
        self.current_offset() - 1
    }

    fn emit_jump_to(&mut self, opcode: OpCode, target: usize) {
        self.emit_with(opcode, Operand::Int(target as i64));
    }

    /// Point a jump at the next instruction to be emitted.
    fn patch_jump(&mut self, at: usize) {
        let target = self.current_offset();
        self.patch_jump_to(at, target);
    }

    fn patch_jump_to(&mut self, at: usize, target: usize) {
        if let Some(instruction) = self.program.instructions.get_mut(at) {
            instruction.operand = Operand::Int(target as i64);
        }
    }

    fn current_offset(&self) -> usize {
        self.program.instructions.len()
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile with the default settings.
pub fn compile(program: &Program) -> CompileResult<BytecodeProgram> {
    Compiler::new().compile(program)
}

/// Names bound by statements directly at the top level.
fn top_level_names(statements: &[Stmt]) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in statements {
        match &stmt.kind {
            StmtKind::VarDecl { name, .. } => {
                names.insert(name.clone());
            }
            StmtKind::Shamble { variable, .. } | StmtKind::Decay { variable, .. } => {
                names.insert(variable.clone());
            }
            StmtKind::Expression(Expr {
                kind:
                    ExprKind::Assign {
                        target,
                        operator: AssignOp::Assign,
                        ..
                    },
                ..
            }) => {
                if let ExprKind::Variable(name) = &target.kind {
                    names.insert(name.clone());
                }
            }
            _ => {}
        }
    }
    names
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Subtract => OpCode::Sub,
        BinaryOp::Multiply => OpCode::Mul,
        BinaryOp::Divide => OpCode::Div,
        BinaryOp::Modulo => OpCode::Mod,
        BinaryOp::Equal => OpCode::Eq,
        BinaryOp::NotEqual => OpCode::Ne,
        BinaryOp::Less => OpCode::Lt,
        BinaryOp::LessEqual => OpCode::Le,
        BinaryOp::Greater => OpCode::Gt,
        BinaryOp::GreaterEqual => OpCode::Ge,
        BinaryOp::BitAnd => OpCode::BitAnd,
        BinaryOp::BitOr => OpCode::BitOr,
        BinaryOp::BitXor => OpCode::BitXor,
        BinaryOp::RotateLeft => OpCode::BitRot,
    }
}

/// Value of an expression built only from numeric literals, negation and
/// binary operators. Operations that would fail at runtime are left for
/// the VM to report.
fn fold_constant(expr: &Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::IntLiteral(n) => Some(Value::Int(*n)),
        ExprKind::FloatLiteral(n) => Some(Value::Float(*n)),
        ExprKind::Unary {
            operator: UnaryOp::Negate,
            operand,
        } => ops::negate(&fold_constant(operand)?, expr.span).ok(),
        ExprKind::Binary {
            left,
            operator,
            right,
        } => {
            let left = fold_constant(left)?;
            let right = fold_constant(right)?;
            ops::binary(*operator, &left, &right, expr.span).ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn compile_source(source: &str) -> CompileResult<BytecodeProgram> {
        let tokens = Scanner::new(source)
            .scan_tokens()
            .map_err(|e| CompileError::new(e.to_string(), Span::default()))?;
        let program = Parser::new(tokens)
            .parse()
            .map_err(|e| CompileError::new(e.to_string(), Span::default()))?;
        Compiler::new().with_peephole(false).compile(&program)
    }

    fn opcodes(program: &BytecodeProgram) -> Vec<OpCode> {
        program.instructions.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_constant_folding() {
        let program = compile_source("corpse x = 2 * 3 + -1;").unwrap();
        assert_eq!(opcodes(&program), vec![OpCode::PushConst, OpCode::StoreGlobal]);
        assert_eq!(program.constants, vec![Constant::Int(5)]);
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let program = compile_source("corpse x = 1 / 0;").unwrap();
        assert!(opcodes(&program).contains(&OpCode::Div));
    }

    #[test]
    fn test_last_expression_is_kept() {
        let program = compile_source("1; 2;").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![OpCode::PushConst, OpCode::Pop, OpCode::PushConst]
        );
    }

    #[test]
    fn test_function_registration() {
        let program = compile_source(
            "infect greet(name, greeting = \"Hail\") { reap greeting + name; }",
        )
        .unwrap();
        let greet = &program.functions["greet"];
        assert_eq!(greet.entry, 1);
        assert_eq!(greet.params, vec!["name".to_string(), "greeting".to_string()]);
        assert_eq!(greet.defaults, vec![false, true]);
        assert_eq!(program.instructions[0].opcode, OpCode::Jmp);
        assert_eq!(program.instructions[0].jump_target(), Some(program.len()));

        let mut recovered = program.clone();
        recovered.recover_parameters();
        assert_eq!(recovered.functions, program.functions);
    }

    #[test]
    fn test_function_locals_and_block_globals() {
        let program = compile_source(
            "corpse total = 0; infect add(n) { corpse t = n; reap t; } if (RISEN) { corpse t = 1; total = t; }",
        )
        .unwrap();
        let names: Vec<(OpCode, String)> = program
            .instructions
            .iter()
            .filter_map(|i| i.operand.as_text().map(|t| (i.opcode, t.to_string())))
            .collect();
        assert!(names.contains(&(OpCode::StoreLocal, "t".to_string())));
        assert!(names.contains(&(OpCode::StoreGlobal, "total".to_string())));
        assert!(names
            .iter()
            .any(|(op, n)| *op == OpCode::StoreGlobal && n.starts_with("t@")));
    }

    #[test]
    fn test_constant_assignment_rejected() {
        let err = compile_source("eternal corpse x = 1; x = 2;").unwrap_err();
        assert!(err.to_string().contains("Cannot modify constant 'x'"));
    }

    #[test]
    fn test_unsupported_constructs() {
        for source in [
            "tomb A { }",
            "risk { harvest 1; } catch () { harvest 2; }",
            "corpse f = infect (corpse a) => a;",
            "corpse t = breach { reap 1; };",
            "if (RISEN) { infect f() { reap 1; } }",
            "infect outer() { infect inner() { reap 1; } }",
        ] {
            let err = compile_source(source).unwrap_err();
            assert!(matches!(err, CompileError::Unsupported { .. }), "{}", source);
        }
    }

    #[test]
    fn test_flee_outside_loop() {
        assert!(compile_source("flee;").is_err());
        assert!(compile_source("soulless { flee; }").is_ok());
    }

    #[test]
    fn test_jumps_are_patched() {
        let program = compile_source(
            "shamble i from 1 to 3 { if (i == 2) { persist; } harvest i; }",
        )
        .unwrap();
        for instruction in &program.instructions {
            if let Some(target) = instruction.jump_target() {
                assert!(target <= program.len());
            }
            if instruction.opcode.is_jump() {
                assert!(instruction.jump_target().is_some());
            }
        }
    }
}
