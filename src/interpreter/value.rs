//! Runtime values shared by the interpreter and the VM.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::ast::{FieldDecl, FunctionDecl, Parameter, Stmt, TypeTag};
use crate::error::RuntimeError;
use crate::interpreter::async_pool::TaskHandle;
use crate::interpreter::builtins::Builtin;
use crate::interpreter::environment::Binding;
use crate::interpreter::secure::SecureString;
use crate::span::Span;

/// Insertion-ordered mapping storage.
pub type MapStore = IndexMap<HashKey, Value, ahash::RandomState>;
pub type ArrayRef = Arc<RwLock<Vec<Value>>>;
pub type MapRef = Arc<RwLock<MapStore>>;
pub type InstanceRef = Arc<RwLock<Instance>>;

pub fn new_map() -> MapStore {
    IndexMap::with_hasher(ahash::RandomState::new())
}

/// A hashable mapping key. Floats and aggregates are not hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(i64),
    Bool(bool),
    Text(String),
    Void,
}

impl HashKey {
    pub fn from_value(value: &Value, span: Span) -> Result<HashKey, RuntimeError> {
        match value {
            Value::Int(n) => Ok(HashKey::Int(*n)),
            Value::Bool(b) => Ok(HashKey::Bool(*b)),
            Value::Text(s) => Ok(HashKey::Text(s.clone())),
            Value::Void => Ok(HashKey::Void),
            other => Err(RuntimeError::type_mismatch(
                "corpse, soul, wraith or void",
                other.type_name(),
                "mapping key",
                span,
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Int(n) => Value::Int(*n),
            HashKey::Bool(b) => Value::Bool(*b),
            HashKey::Text(s) => Value::Text(s.clone()),
            HashKey::Void => Value::Void,
        }
    }

    /// Quoted form used in diagnostics and nested display.
    pub fn repr(&self) -> String {
        self.to_value().repr()
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Void,
    Array(ArrayRef),
    Map(MapRef),
    Secure(Arc<SecureString>),
    Function(Arc<Function>),
    Builtin(Builtin),
    Class(Arc<Class>),
    Instance(InstanceRef),
    /// An error object bound by `catch (Type name)`.
    Error(Arc<RuntimeError>),
    /// Handle returned by `breach`.
    Task(TaskHandle),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn map(store: MapStore) -> Value {
        Value::Map(Arc::new(RwLock::new(store)))
    }

    pub fn secure(text: &str) -> Value {
        Value::Secure(Arc::new(SecureString::from_plain(text)))
    }

    /// The DSL's name for this value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "corpse",
            Value::Float(_) => "phantom",
            Value::Bool(_) => "wraith",
            Value::Text(_) => "soul",
            Value::Void => "void",
            Value::Array(_) => "crypt",
            Value::Map(_) => "grimoire",
            Value::Secure(_) => "shadow",
            Value::Function(_) | Value::Builtin(_) => "infect",
            Value::Class(_) | Value::Instance(_) => "tomb",
            Value::Error(_) => "error",
            Value::Task(_) => "task",
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// The integer payload, or a type error naming `context`.
    pub fn expect_int(&self, context: &str, span: Span) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(RuntimeError::type_mismatch(
                "corpse",
                other.type_name(),
                context,
                span,
            )),
        }
    }

    pub fn expect_text(&self, context: &str, span: Span) -> Result<String, RuntimeError> {
        match self {
            Value::Text(s) => Ok(s.clone()),
            other => Err(RuntimeError::type_mismatch(
                "soul",
                other.type_name(),
                context,
                span,
            )),
        }
    }

    /// Display form used inside collections: text is quoted.
    pub fn repr(&self) -> String {
        match self {
            Value::Text(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }

    /// Rough byte cost charged against the tracked-memory ceiling.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            Value::Array(items) => items.read().len() * 8,
            Value::Map(map) => map.read().len() * 16,
            Value::Secure(s) => s.len(),
            _ => 0,
        }
    }
}

pub fn format_float(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Bool(true) => write!(f, "RISEN"),
            Value::Bool(false) => write!(f, "DEAD"),
            Value::Text(s) => write!(f, "{}", s),
            Value::Void => write!(f, "void"),
            Value::Array(items) => {
                let items = items.read();
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let map = map.read();
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Secure(s) => write!(f, "{}", s),
            Value::Function(func) => write!(f, "<infect {}>", func.name),
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name()),
            Value::Class(class) => write!(f, "<tomb {}>", class.name),
            Value::Instance(instance) => write!(f, "<{} instance>", instance.read().class.name),
            Value::Error(error) => write!(f, "{}: {}", error.kind.name(), error.message),
            Value::Task(task) => write!(f, "<task #{}>", task.id()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Void, Value::Void) => true,
            (Value::Array(a), Value::Array(b)) => {
                Arc::ptr_eq(a, b) || *a.read() == *b.read()
            }
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Secure(a), Value::Secure(b)) => a.constant_time_eq(b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

/// A user-defined function or lambda.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Vec<Stmt>,
    pub return_type: Option<TypeTag>,
    /// Bindings copied from the defining scope; empty for top-level functions.
    pub captured: Vec<(String, Binding)>,
    pub span: Span,
}

impl Function {
    pub fn from_decl(decl: &FunctionDecl, captured: Vec<(String, Binding)>) -> Self {
        Self {
            name: decl.name.clone(),
            params: decl.params.clone(),
            body: decl.body.clone(),
            return_type: decl.return_type,
            captured,
            span: decl.span,
        }
    }

    pub fn lambda(
        params: &[Parameter],
        body: &[Stmt],
        captured: Vec<(String, Binding)>,
        span: Span,
    ) -> Self {
        Self {
            name: "<lambda>".to_string(),
            params: params.to_vec(),
            body: body.to_vec(),
            return_type: None,
            captured,
            span,
        }
    }

    /// Number of parameters without a default.
    pub fn required_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.default_value.is_none())
            .count()
    }

    pub fn is_lambda(&self) -> bool {
        self.name == "<lambda>"
    }
}

/// A class declared with `tomb Name { ... }`.
#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub methods: IndexMap<String, Arc<Function>>,
}

impl Class {
    /// The method named like the class.
    pub fn constructor(&self) -> Option<&Arc<Function>> {
        self.methods.get(&self.name)
    }

    pub fn find_method(&self, name: &str) -> Option<&Arc<Function>> {
        self.methods.get(name)
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Arc<Class>,
    pub fields: IndexMap<String, Value>,
}

impl Instance {
    pub fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            fields: IndexMap::new(),
        }
    }

    /// Field and method names, for "not found" diagnostics.
    pub fn member_names(&self) -> Vec<String> {
        self.fields
            .keys()
            .chain(self.class.methods.keys())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_rules() {
        assert_eq!(Value::Void.to_string(), "void");
        assert_eq!(Value::Bool(true).to_string(), "RISEN");
        assert_eq!(Value::Bool(false).to_string(), "DEAD");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(
            Value::array(vec![Value::Int(1), Value::text("a")]).to_string(),
            "[1, 'a']"
        );
        assert_eq!(Value::secure("abcd").to_string(), "SecureString(len=4)");
    }

    #[test]
    fn test_map_display_keeps_insertion_order() {
        let mut store = new_map();
        store.insert(HashKey::Text("z".into()), Value::Int(1));
        store.insert(HashKey::Text("a".into()), Value::Int(2));
        assert_eq!(Value::map(store).to_string(), "{'z': 1, 'a': 2}");
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::text("1"), Value::Int(1));
        assert_eq!(
            Value::array(vec![Value::Int(1)]),
            Value::array(vec![Value::Int(1)])
        );
    }

    #[test]
    fn test_float_keys_rejected() {
        let err = HashKey::from_value(&Value::Float(1.5), Span::default()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
    }
}
