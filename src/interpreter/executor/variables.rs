//! Assignment to variables, properties and indexed slots.

use crate::ast::{AssignOp, Expr, ExprKind};
use crate::error::RuntimeError;
use crate::interpreter::builtins;
use crate::interpreter::value::Value;
use crate::span::Span;

use super::{Interpreter, RuntimeResult};

impl Interpreter {
    /// Evaluate `target op= value`; the expression's value is the stored value.
    /// A compound form reads the target before evaluating `value`.
    pub(crate) fn evaluate_assignment(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        span: Span,
    ) -> RuntimeResult<Value> {
        match &target.kind {
            ExprKind::Variable(name) => match op.binary_op() {
                None => {
                    let value = self.evaluate(value)?;
                    self.env.assign(name, value.clone(), span)?;
                    Ok(value)
                }
                Some(binary) => {
                    let current = self.env.get(name, target.span)?;
                    let value = self.evaluate(value)?;
                    let updated = self.apply_binary(binary, &current, &value, span)?;
                    self.env.set(name, updated.clone(), span)?;
                    Ok(updated)
                }
            },
            ExprKind::Member { object, name } => {
                let object = self.evaluate(object)?;
                let value = match op.binary_op() {
                    None => self.evaluate(value)?,
                    Some(binary) => {
                        let current = builtins::get_property(&object, name, target.span)?;
                        let value = self.evaluate(value)?;
                        self.apply_binary(binary, &current, &value, span)?
                    }
                };
                let before = map_len(&object);
                builtins::set_property(&object, name, value.clone(), span)?;
                let after = map_len(&object);
                if after > before {
                    self.guard.grow_dict(after, after - before, span)?;
                }
                Ok(value)
            }
            ExprKind::Index { object, index } => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                let value = match op.binary_op() {
                    None => self.evaluate(value)?,
                    Some(binary) => {
                        let current = builtins::index_get(&object, &index, target.span)?;
                        let value = self.evaluate(value)?;
                        self.apply_binary(binary, &current, &value, span)?
                    }
                };
                let before = map_len(&object);
                builtins::index_set(&object, &index, value.clone(), span)?;
                let after = map_len(&object);
                if after > before {
                    self.guard.grow_dict(after, after - before, span)?;
                }
                Ok(value)
            }
            _ => Err(RuntimeError::new("Invalid assignment target", target.span)),
        }
    }
}

fn map_len(value: &Value) -> usize {
    match value {
        Value::Map(map) => map.read().len(),
        _ => 0,
    }
}
