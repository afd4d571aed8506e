//! Function call evaluation.

use std::sync::Arc;

use tracing::trace;

use crate::ast::{Expr, TypeTag};
use crate::error::RuntimeError;
use crate::interpreter::builtins::call_builtin;
use crate::interpreter::environment::Binding;
use crate::interpreter::executor::{ControlSignal, Interpreter, RuntimeResult};
use crate::interpreter::value::{Function, Value};
use crate::span::Span;

impl Interpreter {
    /// Evaluate a call expression. The callee is evaluated before the
    /// arguments, and the arguments left to right.
    pub(crate) fn evaluate_call(
        &mut self,
        callee: &Expr,
        arguments: &[Expr],
        span: Span,
    ) -> RuntimeResult<Value> {
        let callee = self.evaluate(callee)?;
        let args = self.evaluate_arguments(arguments)?;
        self.call_value(callee, args, span)
    }

    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        span: Span,
    ) -> RuntimeResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(&function, args, None, span),
            Value::Builtin(builtin) => call_builtin(self, builtin, args, span),
            Value::Class(class) => self.instantiate(class, args, span),
            other => Err(RuntimeError::type_error(
                format!("'{}' is not callable", other.type_name()),
                span,
            )),
        }
    }

    /// Call a user function, binding `this` when it runs as a method.
    pub(crate) fn call_function(
        &mut self,
        function: &Arc<Function>,
        args: Vec<Value>,
        this: Option<Value>,
        span: Span,
    ) -> RuntimeResult<Value> {
        self.guard.count_call(span)?;
        let max = self.config.max_recursion_depth;
        if self.call_depth >= max {
            return Err(RuntimeError::recursion(self.call_depth, max, span));
        }
        if args.len() > function.params.len() {
            return Err(RuntimeError::new(
                format!(
                    "Function '{}' expects {} arguments, got {}",
                    function.name,
                    function.params.len(),
                    args.len()
                ),
                span,
            ));
        }

        trace!(function = %function.name, depth = self.call_depth, "call");
        self.call_depth += 1;
        let result = self.with_call_scope(|interp| interp.run_function(function, args, this, span));
        self.call_depth -= 1;

        result.map_err(|mut err| {
            err.push_frame(function.name.as_str(), span);
            err
        })
    }

    fn run_function(
        &mut self,
        function: &Arc<Function>,
        args: Vec<Value>,
        this: Option<Value>,
        span: Span,
    ) -> RuntimeResult<Value> {
        for (name, binding) in &function.captured {
            self.env.define_binding(name, binding.clone());
        }
        // Nested functions are not visible from the root, so bind the
        // function's own name to allow recursion.
        if !function.is_lambda() && !self.env.exists(&function.name) {
            self.env.define_binding(
                &function.name,
                Binding::variable(Value::Function(Arc::clone(function)), None),
            );
        }
        if let Some(this) = this {
            self.env
                .define_binding("this", Binding::variable(this, Some(TypeTag::Tomb)));
        }

        let mut args = args.into_iter();
        for param in &function.params {
            let value = match (args.next(), &param.default_value) {
                (Some(value), _) => value,
                (None, Some(default)) => self.evaluate(default)?,
                (None, None) => {
                    return Err(RuntimeError::new(
                        format!("Missing argument for parameter '{}'", param.name),
                        span,
                    ))
                }
            };
            self.env
                .define(&param.name, value, param.type_tag, false, param.span)?;
        }

        match self.execute_statements(&function.body) {
            Ok(_) => Ok(Value::Void),
            Err(ControlSignal::Return(value)) => Ok(value),
            Err(signal) => Err(self.signal_to_error(signal, span)),
        }
    }
}
