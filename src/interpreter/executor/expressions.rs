//! Expression evaluation.

use std::sync::Arc;

use crate::ast::*;
use crate::error::RuntimeError;
use crate::interpreter::builtins;
use crate::interpreter::ops;
use crate::interpreter::value::{new_map, Function, HashKey, Value};
use crate::span::Span;

use super::{Interpreter, RuntimeResult};

impl Interpreter {
    pub(crate) fn evaluate(&mut self, expr: &Expr) -> RuntimeResult<Value> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::IntLiteral(n) => Ok(Value::Int(*n)),
            ExprKind::FloatLiteral(n) => Ok(Value::Float(*n)),
            ExprKind::StringLiteral(s) => {
                self.guard.check_string(s.len(), span)?;
                Ok(Value::text(s.as_str()))
            }
            ExprKind::InterpolatedString(parts) => self.evaluate_interpolation(parts, span),
            ExprKind::Void => Ok(Value::Void),

            ExprKind::Variable(name) => self.env.get(name, span),
            ExprKind::This => self.evaluate_this(span),

            ExprKind::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, *operator, right, span),
            ExprKind::Logical {
                left,
                operator,
                right,
            } => self.evaluate_logical(left, *operator, right),
            ExprKind::Unary { operator, operand } => {
                let value = self.evaluate(operand)?;
                ops::unary(*operator, &value, span)
            }

            ExprKind::Call { callee, arguments } => self.evaluate_call(callee, arguments, span),
            ExprKind::MethodCall {
                object,
                method,
                arguments,
            } => self.evaluate_method_call(object, method, arguments, span),

            ExprKind::Member { object, name } => {
                let object = self.evaluate(object)?;
                builtins::get_property(&object, name, span)
            }
            ExprKind::Index { object, index } => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                builtins::index_get(&object, &index, span)
            }
            ExprKind::Slice {
                object,
                start,
                end,
                step,
            } => {
                let object = self.evaluate(object)?;
                let start = self.evaluate_optional(start.as_deref())?;
                let end = self.evaluate_optional(end.as_deref())?;
                let step = self.evaluate_optional(step.as_deref())?;
                let sliced =
                    builtins::slice(&object, start.as_ref(), end.as_ref(), step.as_ref(), span)?;
                self.guard.check_value(&sliced, span)?;
                Ok(sliced)
            }

            ExprKind::Assign {
                target,
                operator,
                value,
            } => self.evaluate_assignment(target, *operator, value, span),

            ExprKind::Array(elements) => {
                let items = self.evaluate_arguments(elements)?;
                self.guard.check_array(items.len(), span)?;
                Ok(Value::array(items))
            }
            ExprKind::Dict(pairs) => self.evaluate_dict(pairs, span),
            ExprKind::ListComprehension {
                element,
                variable,
                iterable,
                condition,
            } => self.evaluate_comprehension(element, variable, iterable, condition.as_deref(), span),

            ExprKind::Lambda { params, body } => {
                let function = Function::lambda(params, body, self.env.visible_bindings(), span);
                Ok(Value::Function(Arc::new(function)))
            }
            ExprKind::Spawn {
                class_name,
                arguments,
            } => {
                let args = self.evaluate_arguments(arguments)?;
                self.spawn_instance(class_name, args, span)
            }
            ExprKind::Breach(body) => self.evaluate_breach(body, span),
            ExprKind::Await(operand) => {
                let task = self.evaluate(operand)?;
                self.await_task(task, span)
            }
        }
    }

    /// Evaluate arguments left to right.
    pub(crate) fn evaluate_arguments(&mut self, arguments: &[Expr]) -> RuntimeResult<Vec<Value>> {
        arguments.iter().map(|arg| self.evaluate(arg)).collect()
    }

    fn evaluate_optional(&mut self, expr: Option<&Expr>) -> RuntimeResult<Option<Value>> {
        expr.map(|e| self.evaluate(e)).transpose()
    }

    fn evaluate_this(&self, span: Span) -> RuntimeResult<Value> {
        match self.env.lookup("this") {
            Some(binding) => Ok(binding.value),
            None => Err(RuntimeError::new(
                "'this' can only be used inside a method",
                span,
            )),
        }
    }

    fn evaluate_interpolation(
        &mut self,
        parts: &[InterpolatedPart],
        span: Span,
    ) -> RuntimeResult<Value> {
        let mut text = String::new();
        for part in parts {
            match part {
                InterpolatedPart::Literal(literal) => text.push_str(literal),
                InterpolatedPart::Expression(expr) => {
                    let value = self.evaluate(expr)?;
                    text.push_str(&value.to_string());
                }
            }
        }
        self.guard.check_string(text.len(), span)?;
        Ok(Value::Text(text))
    }

    fn evaluate_dict(&mut self, pairs: &[(Expr, Expr)], span: Span) -> RuntimeResult<Value> {
        let mut store = new_map();
        for (key_expr, value_expr) in pairs {
            let key = self.evaluate(key_expr)?;
            let key = HashKey::from_value(&key, key_expr.span)?;
            let value = self.evaluate(value_expr)?;
            store.insert(key, value);
        }
        self.guard.check_dict(store.len(), span)?;
        Ok(Value::map(store))
    }

    fn evaluate_comprehension(
        &mut self,
        element: &Expr,
        variable: &str,
        iterable: &Expr,
        condition: Option<&Expr>,
        span: Span,
    ) -> RuntimeResult<Value> {
        let source = self.evaluate(iterable)?;
        let items = builtins::iterate(&source, iterable.span)?;
        let collected = self.with_scope(|this| -> RuntimeResult<Vec<Value>> {
            let mut collected = Vec::new();
            for item in items {
                this.env.define(variable, item, None, false, span)?;
                if let Some(condition) = condition {
                    let keep = this.evaluate(condition)?;
                    if !ops::truthy(&keep, condition.span)? {
                        continue;
                    }
                }
                collected.push(this.evaluate(element)?);
            }
            Ok(collected)
        })?;
        self.guard.check_array(collected.len(), span)?;
        Ok(Value::array(collected))
    }
}
