//! Binary and logical operator evaluation.

use crate::ast::*;
use crate::interpreter::ops;
use crate::interpreter::value::Value;
use crate::span::Span;

use super::{Interpreter, RuntimeResult};

impl Interpreter {
    pub(crate) fn evaluate_binary(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        span: Span,
    ) -> RuntimeResult<Value> {
        let left_val = self.evaluate(left)?;
        let right_val = self.evaluate(right)?;
        self.apply_binary(op, &left_val, &right_val, span)
    }

    /// Shared by binary expressions and compound assignment.
    pub(crate) fn apply_binary(
        &mut self,
        op: BinaryOp,
        left: &Value,
        right: &Value,
        span: Span,
    ) -> RuntimeResult<Value> {
        let result = ops::binary(op, left, right, span)?;
        if matches!(result, Value::Text(_) | Value::Secure(_)) {
            self.guard.check_value(&result, span)?;
        }
        Ok(result)
    }

    /// `corrupt` / `infest` short-circuit and always yield a wraith.
    pub(crate) fn evaluate_logical(
        &mut self,
        left: &Expr,
        op: LogicalOp,
        right: &Expr,
    ) -> RuntimeResult<Value> {
        let left_val = self.evaluate(left)?;
        let left_truth = ops::truthy(&left_val, left.span)?;
        match (op, left_truth) {
            (LogicalOp::And, false) => Ok(Value::Bool(false)),
            (LogicalOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let right_val = self.evaluate(right)?;
                Ok(Value::Bool(ops::truthy(&right_val, right.span)?))
            }
        }
    }
}
