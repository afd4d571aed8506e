//! Scope chain for the tree-walking interpreter.
//!
//! Scopes live in an arena and refer to their parent by index. They are
//! created and destroyed strictly LIFO, so popping a scope truncates the arena.
//!
//! Each binding's value sits in a shared cell. Cloning an `Environment`
//! (as `breach` does) keeps the cells, so a task writing an enclosing
//! binding is seen by its spawner and the other way round.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::ast::TypeTag;
use crate::error::RuntimeError;
use crate::interpreter::builtins::Builtin;
use crate::interpreter::value::Value;
use crate::span::Span;

pub type ScopeId = usize;

/// The scope holding builtins and top-level declarations.
pub const ROOT_SCOPE: ScopeId = 0;

/// Names no declaration may rebind.
pub fn is_reserved(name: &str) -> bool {
    matches!(name, "DEAD" | "RISEN" | "void" | "ritual_args") || Builtin::from_name(name).is_some()
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub type_tag: Option<TypeTag>,
    pub is_constant: bool,
    pub is_builtin: bool,
}

impl Binding {
    pub fn variable(value: Value, type_tag: Option<TypeTag>) -> Self {
        Self {
            value,
            type_tag,
            is_constant: false,
            is_builtin: false,
        }
    }

    pub fn builtin(value: Value) -> Self {
        Self {
            value,
            type_tag: None,
            is_constant: true,
            is_builtin: true,
        }
    }
}

/// A binding as stored in a scope.
#[derive(Debug, Clone)]
struct Slot {
    cell: Arc<RwLock<Value>>,
    type_tag: Option<TypeTag>,
    is_constant: bool,
    is_builtin: bool,
}

impl Slot {
    fn new(binding: Binding) -> Self {
        Self {
            cell: Arc::new(RwLock::new(binding.value)),
            type_tag: binding.type_tag,
            is_constant: binding.is_constant,
            is_builtin: binding.is_builtin,
        }
    }

    fn snapshot(&self) -> Binding {
        Binding {
            value: self.cell.read().clone(),
            type_tag: self.type_tag,
            is_constant: self.is_constant,
            is_builtin: self.is_builtin,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: IndexMap<String, Slot, ahash::RandomState>,
    parent: Option<ScopeId>,
}

#[derive(Debug, Clone)]
pub struct Environment {
    scopes: Vec<Scope>,
    /// Scopes entered and not yet left; the last one is current.
    active: Vec<ScopeId>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
            active: vec![ROOT_SCOPE],
        }
    }

    pub fn current(&self) -> ScopeId {
        self.active.last().copied().unwrap_or(ROOT_SCOPE)
    }

    pub fn is_global(&self) -> bool {
        self.current() == ROOT_SCOPE
    }

    /// Number of live scopes, root included.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Enter a child of the current scope.
    pub fn push_scope(&mut self) -> ScopeId {
        self.push_scope_with_parent(self.current())
    }

    /// Enter a scope whose lookups continue at `parent` (function calls use the root).
    pub fn push_scope_with_parent(&mut self, parent: ScopeId) -> ScopeId {
        let id = self.scopes.len();
        self.scopes.push(Scope {
            bindings: IndexMap::default(),
            parent: Some(parent),
        });
        self.active.push(id);
        id
    }

    /// Leave the most recently entered scope. The root is never popped.
    pub fn pop_scope(&mut self) {
        if self.active.len() <= 1 {
            return;
        }
        if let Some(id) = self.active.pop() {
            debug_assert_eq!(id + 1, self.scopes.len(), "scopes must be popped LIFO");
            self.scopes.truncate(id);
        }
    }

    /// Seed a builtin binding in the root scope.
    pub fn define_builtin(&mut self, name: &str, value: Value) {
        self.scopes[ROOT_SCOPE]
            .bindings
            .insert(name.to_string(), Slot::new(Binding::builtin(value)));
    }

    /// Bind `name` in the current scope, replacing any binding there.
    pub fn define(
        &mut self,
        name: &str,
        value: Value,
        type_tag: Option<TypeTag>,
        is_constant: bool,
        span: Span,
    ) -> Result<(), RuntimeError> {
        if is_reserved(name) {
            return Err(RuntimeError::new(
                format!("Cannot redefine reserved identifier '{}'", name),
                span,
            ));
        }
        self.define_binding(
            name,
            Binding {
                value,
                type_tag,
                is_constant,
                is_builtin: false,
            },
        );
        Ok(())
    }

    /// Bind without the reserved-name check (`this`, captured bindings).
    /// Redefining a name in the same scope writes through its existing cell.
    pub(crate) fn define_binding(&mut self, name: &str, binding: Binding) {
        let current = self.current();
        let bindings = &mut self.scopes[current].bindings;
        match bindings.get_mut(name) {
            Some(slot) => {
                *slot.cell.write() = binding.value;
                slot.type_tag = binding.type_tag;
                slot.is_constant = binding.is_constant;
                slot.is_builtin = binding.is_builtin;
            }
            None => {
                bindings.insert(name.to_string(), Slot::new(binding));
            }
        }
    }

    fn resolve(&self, name: &str) -> Option<ScopeId> {
        let mut scope = Some(self.current());
        while let Some(id) = scope {
            if self.scopes[id].bindings.contains_key(name) {
                return Some(id);
            }
            scope = self.scopes[id].parent;
        }
        None
    }

    /// Snapshot of the nearest binding for `name`.
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.resolve(name)
            .and_then(|id| self.scopes[id].bindings.get(name))
            .map(Slot::snapshot)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn get(&self, name: &str, span: Span) -> Result<Value, RuntimeError> {
        match self.resolve(name).and_then(|id| self.scopes[id].bindings.get(name)) {
            Some(slot) => Ok(slot.cell.read().clone()),
            None => Err(RuntimeError::undefined_variable(
                name,
                self.available_names(5),
                span,
            )),
        }
    }

    /// Update the owning scope's binding.
    pub fn set(&mut self, name: &str, value: Value, span: Span) -> Result<(), RuntimeError> {
        let Some(id) = self.resolve(name) else {
            return Err(RuntimeError::undefined_variable(
                name,
                self.available_names(5),
                span,
            ));
        };
        let Some(binding) = self.scopes[id].bindings.get(name) else {
            return Err(RuntimeError::undefined_variable(name, Vec::new(), span));
        };
        if binding.is_builtin {
            return Err(RuntimeError::new(
                format!("Cannot modify built-in '{}'", name),
                span,
            ));
        }
        if binding.is_constant {
            return Err(RuntimeError::new(
                format!("Cannot modify constant '{}'", name),
                span,
            ));
        }
        *binding.cell.write() = value;
        Ok(())
    }

    /// Plain `name = value`: update if bound anywhere, else define here.
    pub fn assign(&mut self, name: &str, value: Value, span: Span) -> Result<(), RuntimeError> {
        if self.exists(name) {
            self.set(name, value, span)
        } else {
            self.define(name, value, None, false, span)
        }
    }

    /// Every binding visible from the current scope except the root's,
    /// nearest first, copied out of their cells. Used to capture lambdas
    /// and nested functions by value.
    pub fn visible_bindings(&self) -> Vec<(String, Binding)> {
        let mut seen = ahash::AHashSet::new();
        let mut out = Vec::new();
        let mut scope = Some(self.current());
        while let Some(id) = scope {
            if id == ROOT_SCOPE {
                break;
            }
            for (name, slot) in &self.scopes[id].bindings {
                if seen.insert(name.clone()) {
                    out.push((name.clone(), slot.snapshot()));
                }
            }
            scope = self.scopes[id].parent;
        }
        out
    }

    /// Up to `limit` user-visible names for "did you mean" hints.
    pub fn available_names(&self, limit: usize) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut scope = Some(self.current());
        while let Some(id) = scope {
            for (name, binding) in &self.scopes[id].bindings {
                if !binding.is_builtin && name != "this" && !names.contains(name) {
                    names.push(name.clone());
                }
            }
            scope = self.scopes[id].parent;
        }
        names.sort();
        names.truncate(limit);
        names
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn span() -> Span {
        Span::new(0, 1, 1, 1)
    }

    #[test]
    fn test_define_and_get() {
        let mut env = Environment::new();
        env.define("x", Value::Int(5), Some(TypeTag::Corpse), false, span())
            .unwrap();
        assert_eq!(env.get("x", span()).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_child_scope_shadows_and_pops() {
        let mut env = Environment::new();
        env.define("x", Value::Int(1), None, false, span()).unwrap();
        env.push_scope();
        env.define("x", Value::Int(2), None, false, span()).unwrap();
        assert_eq!(env.get("x", span()).unwrap(), Value::Int(2));
        env.pop_scope();
        assert_eq!(env.get("x", span()).unwrap(), Value::Int(1));
        assert_eq!(env.depth(), 1);
    }

    #[test]
    fn test_set_walks_to_owner() {
        let mut env = Environment::new();
        env.define("count", Value::Int(0), None, false, span())
            .unwrap();
        env.push_scope();
        env.set("count", Value::Int(3), span()).unwrap();
        env.pop_scope();
        assert_eq!(env.get("count", span()).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_constant_and_builtin_are_immutable() {
        let mut env = Environment::new();
        env.define("limit", Value::Int(10), None, true, span())
            .unwrap();
        let err = env.set("limit", Value::Int(11), span()).unwrap_err();
        assert!(err.message.contains("Cannot modify constant"));

        env.define_builtin("ritual_args", Value::array(Vec::new()));
        let err = env.set("ritual_args", Value::Void, span()).unwrap_err();
        assert!(err.message.contains("Cannot modify built-in"));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut env = Environment::new();
        let err = env
            .define("harvest", Value::Int(1), None, false, span())
            .unwrap_err();
        assert!(err.message.contains("reserved identifier 'harvest'"));
    }

    #[test]
    fn test_undefined_lists_available_names() {
        let mut env = Environment::new();
        env.define("beta", Value::Int(1), None, false, span()).unwrap();
        env.define("alpha", Value::Int(1), None, false, span()).unwrap();
        let err = env.get("gamma", span()).unwrap_err();
        assert_eq!(
            err.message,
            "Undefined variable 'gamma' Available names: alpha, beta"
        );
    }

    #[test]
    fn test_detached_scope_skips_callers_locals() {
        let mut env = Environment::new();
        env.push_scope();
        env.define("local", Value::Int(1), None, false, span()).unwrap();
        env.push_scope_with_parent(ROOT_SCOPE);
        assert!(!env.exists("local"));
        env.pop_scope();
        assert!(env.exists("local"));
    }

    #[test]
    fn test_clones_share_binding_cells() {
        let mut env = Environment::new();
        env.define("hits", Value::Int(0), None, false, span()).unwrap();
        let mut task = env.clone();
        task.push_scope();
        task.set("hits", Value::Int(5), span()).unwrap();
        task.define("scratch", Value::Int(1), None, false, span()).unwrap();
        assert_eq!(env.get("hits", span()).unwrap(), Value::Int(5));
        assert!(!env.exists("scratch"));

        env.set("hits", Value::Int(9), span()).unwrap();
        assert_eq!(task.get("hits", span()).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_captured_bindings_are_copies() {
        let mut env = Environment::new();
        env.push_scope();
        env.define("n", Value::Int(1), None, false, span()).unwrap();
        let captured = env.visible_bindings();
        env.set("n", Value::Int(2), span()).unwrap();
        assert_eq!(captured[0].1.value, Value::Int(1));
    }

    #[test]
    fn test_visible_bindings_nearest_first() {
        let mut env = Environment::new();
        env.define("g", Value::Int(0), None, false, span()).unwrap();
        env.push_scope();
        env.define("a", Value::Int(1), None, false, span()).unwrap();
        env.push_scope();
        env.define("a", Value::Int(2), None, false, span()).unwrap();
        let captured = env.visible_bindings();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].1.value, Value::Int(2));
    }
}
