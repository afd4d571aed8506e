//! Statement execution.

use std::sync::Arc;

use tracing::debug;

use crate::ast::*;
use crate::error::RuntimeError;
use crate::interpreter::builtins::{self, call_builtin, Builtin};
use crate::interpreter::ops;
use crate::interpreter::secure::SecureString;
use crate::interpreter::value::{new_map, Function, HashKey, Value};
use crate::span::Span;

use super::{ControlSignal, ExecResult, Interpreter, RuntimeResult};

impl Interpreter {
    /// Execute a statement, yielding its value or a control signal.
    pub(crate) fn execute(&mut self, stmt: &Stmt) -> ExecResult {
        self.guard.tick(stmt.span)?;
        match &stmt.kind {
            StmtKind::Expression(expr) => Ok(self.evaluate(expr)?),

            StmtKind::VarDecl {
                name,
                type_tag,
                initializer,
                is_constant,
            } => {
                self.declare_variable(name, *type_tag, initializer.as_ref(), *is_constant, stmt.span)?;
                Ok(Value::Void)
            }

            StmtKind::Block(statements) => self.execute_block(statements),

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let value = self.evaluate(condition)?;
                if ops::truthy(&value, condition.span)? {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Value::Void)
                }
            }

            StmtKind::Shamble {
                variable,
                start,
                end,
                body,
            } => self.execute_shamble(variable, start, end, body),

            StmtKind::Decay {
                variable,
                iterable,
                body,
            } => {
                let iterable_value = self.evaluate(iterable)?;
                for item in builtins::iterate(&iterable_value, iterable.span)? {
                    self.env.assign(variable, item, stmt.span)?;
                    if !self.run_loop_body(body)? {
                        break;
                    }
                }
                Ok(Value::Void)
            }

            StmtKind::Soulless(body) => {
                while self.run_loop_body(body)? {}
                Ok(Value::Void)
            }

            StmtKind::Judge {
                subject,
                cases,
                default,
            } => {
                let subject = self.evaluate(subject)?;
                for case in cases {
                    if self.evaluate(&case.value)? == subject {
                        return self.execute_block(&case.body);
                    }
                }
                match default {
                    Some(body) => self.execute_block(body),
                    None => Ok(Value::Void),
                }
            }

            StmtKind::Flee => Err(ControlSignal::Break),
            StmtKind::Persist => Err(ControlSignal::Continue),

            StmtKind::Reap(value) => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Void,
                };
                Err(ControlSignal::Return(value))
            }

            StmtKind::Harvest(arguments) => {
                let args = self.evaluate_arguments(arguments)?;
                call_builtin(self, Builtin::Harvest, args, stmt.span)?;
                Ok(Value::Void)
            }

            StmtKind::Rest(duration) => {
                let ms = self.evaluate(duration)?;
                call_builtin(self, Builtin::Rest, vec![ms], stmt.span)?;
                Ok(Value::Void)
            }

            StmtKind::Function(decl) => {
                self.declare_function(decl)?;
                Ok(Value::Void)
            }

            StmtKind::Class(decl) => {
                self.declare_class(decl)?;
                Ok(Value::Void)
            }

            StmtKind::Risk {
                body,
                catches,
                finally,
            } => self.execute_risk(body, catches, finally.as_deref()),

            StmtKind::Throw {
                error_type,
                message,
            } => Err(self.throw_error(error_type.as_deref(), message.as_ref(), stmt.span)?.into()),

            StmtKind::Infiltrate(import) => {
                self.execute_import(import)?;
                Ok(Value::Void)
            }

            StmtKind::Cloak(feature) => {
                debug!(feature = %feature, "cloak feature enabled");
                self.cloaked.push(feature.clone());
                Ok(Value::Void)
            }
        }
    }

    /// Run one loop iteration. `Ok(false)` means the loop should stop.
    fn run_loop_body(&mut self, body: &Stmt) -> Result<bool, ControlSignal> {
        match self.execute(body) {
            Ok(_) | Err(ControlSignal::Continue) => Ok(true),
            Err(ControlSignal::Break) => Ok(false),
            Err(signal) => Err(signal),
        }
    }

    fn execute_shamble(
        &mut self,
        variable: &str,
        start: &Expr,
        end: &Expr,
        body: &Stmt,
    ) -> ExecResult {
        let first = self.evaluate(start)?.expect_int("shamble start", start.span)?;
        let last = self.evaluate(end)?.expect_int("shamble end", end.span)?;
        let mut current = first;
        while current <= last {
            self.env.assign(variable, Value::Int(current), start.span)?;
            if !self.run_loop_body(body)? {
                break;
            }
            match current.checked_add(1) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(Value::Void)
    }

    fn declare_variable(
        &mut self,
        name: &str,
        type_tag: TypeTag,
        initializer: Option<&Expr>,
        is_constant: bool,
        span: Span,
    ) -> RuntimeResult<()> {
        let value = match initializer {
            Some(expr) => self.evaluate(expr)?,
            None => Value::Void,
        };
        let value = match (type_tag, value) {
            (TypeTag::Shadow, Value::Text(plain)) => {
                let secret = Arc::new(SecureString::from_plain(&plain));
                self.track_secure(&secret);
                Value::Secure(secret)
            }
            (_, value) => value,
        };
        self.env.define(name, value, Some(type_tag), is_constant, span)
    }

    pub(super) fn declare_function(&mut self, decl: &FunctionDecl) -> RuntimeResult<()> {
        let captured = if self.env.is_global() {
            Vec::new()
        } else {
            self.env.visible_bindings()
        };
        let function = Function::from_decl(decl, captured);
        self.env.define(
            &decl.name,
            Value::Function(Arc::new(function)),
            None,
            false,
            decl.span,
        )
    }

    fn execute_import(&mut self, import: &ImportDecl) -> RuntimeResult<()> {
        let symbols = self.modules.load(&import.module).map_err(|reason| {
            RuntimeError::new(
                format!("Failed to import module '{}': {}", import.module, reason),
                import.span,
            )
        })?;
        debug!(module = %import.module, symbols = symbols.len(), "module infiltrated");

        if !import.items.is_empty() {
            for item in &import.items {
                let Some((_, value)) = symbols.iter().find(|(name, _)| name == item) else {
                    return Err(RuntimeError::new(
                        format!("Symbol '{}' not found in module '{}'", item, import.module),
                        import.span,
                    ));
                };
                self.env.define(item, value.clone(), None, false, import.span)?;
            }
            return Ok(());
        }

        let mut namespace = new_map();
        for (name, value) in symbols {
            namespace.insert(HashKey::Text(name), value);
        }
        let binding = import.alias.as_deref().unwrap_or(&import.module);
        self.env.define(
            binding,
            Value::map(namespace),
            Some(TypeTag::Grimoire),
            false,
            import.span,
        )
    }
}
