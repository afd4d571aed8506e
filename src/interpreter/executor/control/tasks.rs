//! `breach` blocks and `await`.

use tracing::debug;

use crate::ast::Stmt;
use crate::error::RuntimeError;
use crate::interpreter::async_pool::TaskOutcome;
use crate::interpreter::executor::{ControlSignal, Interpreter, RuntimeResult};
use crate::interpreter::guard::ResourceGuard;
use crate::interpreter::value::Value;
use crate::span::Span;

impl Interpreter {
    /// Submit the block to the worker pool and return its task handle at once.
    /// The task runs on a clone whose scopes share binding cells with ours,
    /// so writes to enclosing bindings are visible after `await`.
    pub(crate) fn evaluate_breach(&mut self, body: &[Stmt], span: Span) -> RuntimeResult<Value> {
        let mut worker = self.clone();
        worker.secure_strings = Vec::new();
        let body = body.to_vec();
        let handle = self
            .pool
            .submit(move || worker.run_task(&body, span))
            .map_err(|err| RuntimeError::new(format!("Failed to start async task: {}", err), span))?;
        debug!(task = handle.id(), "breach submitted");
        Ok(Value::Task(handle))
    }

    fn run_task(mut self, body: &[Stmt], span: Span) -> TaskOutcome {
        match self.execute_block(body) {
            Ok(_) => Ok(Value::Void),
            Err(ControlSignal::Return(value)) => Ok(value),
            Err(signal) => Err(self.signal_to_error(signal, span)),
        }
    }

    /// Block until the task finishes or the run's deadline passes. A task
    /// error propagates unchanged.
    pub(crate) fn await_task(&mut self, value: Value, span: Span) -> RuntimeResult<Value> {
        let Value::Task(handle) = value else {
            return Err(RuntimeError::type_mismatch(
                "task",
                value.type_name(),
                "await",
                span,
            )
            .with_message(format!("Cannot await non-async value: {}", value.type_name())));
        };
        match handle.join_until(self.guard.deadline()) {
            Some(outcome) => outcome,
            None => Err(ResourceGuard::timeout_error(span)),
        }
    }
}
