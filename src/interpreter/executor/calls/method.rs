//! Method call evaluation.

use crate::ast::Expr;
use crate::error::RuntimeError;
use crate::interpreter::builtins::{self, methods::DICT_METHODS};
use crate::interpreter::executor::{Interpreter, RuntimeResult};
use crate::interpreter::value::{HashKey, Value};
use crate::span::Span;

impl Interpreter {
    pub(crate) fn evaluate_method_call(
        &mut self,
        object: &Expr,
        method: &str,
        arguments: &[Expr],
        span: Span,
    ) -> RuntimeResult<Value> {
        let receiver = self.evaluate(object)?;
        let args = self.evaluate_arguments(arguments)?;
        self.call_method(receiver, method, args, span)
    }

    /// Instance methods first, then callables stored in a grimoire (module
    /// namespaces), then the built-in methods of the receiver's type.
    pub(crate) fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
        span: Span,
    ) -> RuntimeResult<Value> {
        match &receiver {
            Value::Instance(instance) => {
                let (found, field, members) = {
                    let instance = instance.read();
                    (
                        instance.class.find_method(method).cloned(),
                        instance.fields.get(method).cloned(),
                        instance.member_names(),
                    )
                };
                if let Some(function) = found {
                    return self.call_function(&function, args, Some(receiver.clone()), span);
                }
                match field {
                    Some(callee) => self.call_value(callee, args, span),
                    None => Err(RuntimeError::property_not_found(method, members, span)
                        .with_message(format!("Method '{}' not found", method))),
                }
            }
            Value::Map(map) if !DICT_METHODS.contains(&method) => {
                let entry = map.read().get(&HashKey::Text(method.to_string())).cloned();
                match entry {
                    Some(callee @ (Value::Function(_) | Value::Builtin(_) | Value::Class(_))) => {
                        self.call_value(callee, args, span)
                    }
                    _ => builtins::call_method(&mut self.guard, &receiver, method, args, span),
                }
            }
            _ => builtins::call_method(&mut self.guard, &receiver, method, args, span),
        }
    }
}
