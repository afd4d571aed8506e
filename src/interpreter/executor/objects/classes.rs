//! Class declaration and instantiation.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::ast::{ClassDecl, TypeTag};
use crate::error::RuntimeError;
use crate::interpreter::executor::{Interpreter, RuntimeResult};
use crate::interpreter::value::{Class, Function, Instance, Value};
use crate::span::Span;

impl Interpreter {
    pub(crate) fn declare_class(&mut self, decl: &ClassDecl) -> RuntimeResult<()> {
        let captured = if self.env.is_global() {
            Vec::new()
        } else {
            self.env.visible_bindings()
        };
        let methods: IndexMap<String, Arc<Function>> = decl
            .methods
            .iter()
            .map(|method| {
                (
                    method.name.clone(),
                    Arc::new(Function::from_decl(method, captured.clone())),
                )
            })
            .collect();
        let class = Class {
            name: decl.name.clone(),
            fields: decl.fields.clone(),
            methods,
        };
        self.env.define(
            &decl.name,
            Value::Class(Arc::new(class)),
            Some(TypeTag::Tomb),
            false,
            decl.span,
        )
    }

    /// `spawn Name(args)`
    pub(crate) fn spawn_instance(
        &mut self,
        class_name: &str,
        args: Vec<Value>,
        span: Span,
    ) -> RuntimeResult<Value> {
        match self.env.get(class_name, span)? {
            Value::Class(class) => self.instantiate(class, args, span),
            _ => Err(RuntimeError::type_error(
                format!("'{}' is not a class", class_name),
                span,
            )),
        }
    }

    /// Build an instance: field initializers run in declaration order, then
    /// the same-named constructor if the class has one. A `reap` inside the
    /// constructor does not replace the instance.
    pub(crate) fn instantiate(
        &mut self,
        class: Arc<Class>,
        args: Vec<Value>,
        span: Span,
    ) -> RuntimeResult<Value> {
        let mut instance = Instance::new(Arc::clone(&class));
        for field in &class.fields {
            let value = match &field.initializer {
                Some(expr) => self.evaluate(expr)?,
                None => Value::Void,
            };
            instance.fields.insert(field.name.clone(), value);
        }
        let this = Value::Instance(Arc::new(RwLock::new(instance)));

        match class.constructor() {
            Some(constructor) => {
                let total = constructor.params.len();
                let required = constructor.required_arity();
                if !(required..=total).contains(&args.len()) {
                    return Err(RuntimeError::new(
                        format!(
                            "Constructor '{}' expects {} arguments, got {}",
                            class.name,
                            total,
                            args.len()
                        ),
                        span,
                    ));
                }
                self.call_function(constructor, args, Some(this.clone()), span)?;
            }
            None if !args.is_empty() => {
                return Err(RuntimeError::new(
                    format!(
                        "Class '{}' has no constructor but got {} arguments",
                        class.name,
                        args.len()
                    ),
                    span,
                ));
            }
            None => {}
        }
        Ok(this)
    }
}
