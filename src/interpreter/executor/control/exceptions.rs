//! `risk` / `catch` / `finally` and `throw`.

use std::sync::Arc;

use tracing::debug;

use crate::ast::{CatchClause, Expr, Stmt, TypeTag};
use crate::error::RuntimeError;
use crate::interpreter::builtins::throw_kind;
use crate::interpreter::executor::{ControlSignal, ExecResult, Interpreter, RuntimeResult};
use crate::interpreter::value::Value;
use crate::span::Span;

impl Interpreter {
    /// The first clause whose type matches handles the error. `finally`
    /// runs exactly once on every path; an error it raises wins.
    pub(crate) fn execute_risk(
        &mut self,
        body: &[Stmt],
        catches: &[CatchClause],
        finally: Option<&[Stmt]>,
    ) -> ExecResult {
        let outcome = match self.execute_block(body) {
            Err(ControlSignal::Raised(err)) if err.exit_code().is_none() => {
                self.handle_error(err, catches)
            }
            other => other,
        };
        if let Some(finally) = finally {
            self.execute_block(finally)?;
        }
        outcome.map(|_| Value::Void)
    }

    fn handle_error(&mut self, err: RuntimeError, catches: &[CatchClause]) -> ExecResult {
        let clause = catches.iter().find(|clause| match &clause.error_type {
            None => true,
            Some(requested) => err.matches(requested),
        });
        let Some(clause) = clause else {
            return Err(ControlSignal::Raised(err));
        };
        debug!(kind = %err.kind, "error caught");

        match &clause.binding {
            Some(name) => self.with_scope(|this| {
                this.env.define(
                    name,
                    Value::Error(Arc::new(err)),
                    Some(TypeTag::Tomb),
                    false,
                    clause.span,
                )?;
                this.execute_statements(&clause.body)
            }),
            None => self.execute_block(&clause.body),
        }
    }

    /// Build the error raised by `throw [Type] [message]`. Throwing a caught
    /// error object without a type re-raises it unchanged.
    pub(crate) fn throw_error(
        &mut self,
        error_type: Option<&str>,
        message: Option<&Expr>,
        span: Span,
    ) -> RuntimeResult<RuntimeError> {
        let message = match message {
            None => "Exception raised".to_string(),
            Some(expr) => match self.evaluate(expr)? {
                Value::Error(original) if error_type.is_none() => return Ok((*original).clone()),
                Value::Text(text) => text,
                other => other.to_string(),
            },
        };
        Ok(RuntimeError::with_kind(throw_kind(error_type), message, span))
    }
}
