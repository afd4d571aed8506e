//! Property, index and slice access, and iteration order for `decay`.

use crate::error::{ErrorDetail, ErrorKind, RuntimeError};
use crate::interpreter::value::{HashKey, Value};
use crate::span::Span;

/// Resolve a possibly negative index against `len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    (0..len as i64).contains(&adjusted).then_some(adjusted as usize)
}

fn adjusted(index: i64, len: usize) -> i64 {
    if index < 0 {
        index + len as i64
    } else {
        index
    }
}

fn key_error(message: String, key: &str, available: Vec<String>, span: Span) -> RuntimeError {
    RuntimeError::with_kind(ErrorKind::Key, message, span).with_detail(ErrorDetail::Key {
        key: key.to_string(),
        available,
    })
}

pub fn get_property(object: &Value, name: &str, span: Span) -> Result<Value, RuntimeError> {
    match object {
        Value::Array(items) => match name {
            "length" => Ok(Value::Int(items.read().len() as i64)),
            _ => Err(key_error(
                format!("Array property '{}' not found", name),
                name,
                vec!["length".to_string()],
                span,
            )),
        },
        Value::Text(text) => match name {
            "length" => Ok(Value::Int(text.chars().count() as i64)),
            _ => Err(key_error(
                format!("String property '{}' not found", name),
                name,
                vec!["length".to_string()],
                span,
            )),
        },
        Value::Secure(secret) if name == "length" => Ok(Value::Int(secret.len() as i64)),
        Value::Map(map) => {
            let map = map.read();
            match map.get(&HashKey::Text(name.to_string())) {
                Some(value) => Ok(value.clone()),
                None => Err(RuntimeError::property_not_found(
                    name,
                    map.keys().map(|k| k.to_string()).collect(),
                    span,
                )),
            }
        }
        Value::Instance(instance) => {
            let instance = instance.read();
            if let Some(value) = instance.fields.get(name) {
                return Ok(value.clone());
            }
            if let Some(method) = instance.class.find_method(name) {
                return Ok(Value::Function(method.clone()));
            }
            Err(RuntimeError::property_not_found(
                name,
                instance.member_names(),
                span,
            ))
        }
        Value::Error(error) => match name {
            "message" => Ok(Value::text(error.message.as_str())),
            "type" => Ok(Value::text(error.kind.name())),
            "line" => Ok(Value::Int(error.span.line as i64)),
            "column" => Ok(Value::Int(error.span.column as i64)),
            _ => Err(key_error(
                format!("Exception object has no attribute '{}'", name),
                name,
                ["message", "type", "line", "column"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                span,
            )),
        },
        other => Err(RuntimeError::type_mismatch(
            "tomb, crypt, soul or error",
            other.type_name(),
            "property access",
            span,
        )
        .with_message(format!("Cannot access property of {}", other.type_name()))),
    }
}

pub fn set_property(object: &Value, name: &str, value: Value, span: Span) -> Result<(), RuntimeError> {
    match object {
        Value::Map(map) => {
            map.write().insert(HashKey::Text(name.to_string()), value);
            Ok(())
        }
        Value::Instance(instance) => {
            instance.write().fields.insert(name.to_string(), value);
            Ok(())
        }
        other => Err(RuntimeError::type_mismatch(
            "tomb",
            other.type_name(),
            "property assignment",
            span,
        )
        .with_message(format!("Cannot assign property of {}", other.type_name()))),
    }
}

pub fn index_get(object: &Value, index: &Value, span: Span) -> Result<Value, RuntimeError> {
    match object {
        Value::Array(items) => {
            let i = index.expect_int("array index", span)?;
            let items = items.read();
            normalize_index(i, items.len())
                .map(|pos| items[pos].clone())
                .ok_or_else(|| {
                    RuntimeError::index_out_of_bounds("array", adjusted(i, items.len()), items.len(), span)
                })
        }
        Value::Text(text) => {
            let i = index.expect_int("string index", span)?;
            let len = text.chars().count();
            normalize_index(i, len)
                .and_then(|pos| text.chars().nth(pos))
                .map(|c| Value::Text(c.to_string()))
                .ok_or_else(|| RuntimeError::index_out_of_bounds("text", adjusted(i, len), len, span))
        }
        Value::Map(map) => {
            let key = HashKey::from_value(index, span)?;
            let map = map.read();
            map.get(&key).cloned().ok_or_else(|| {
                RuntimeError::key_not_found(
                    key.repr(),
                    map.keys().map(|k| k.to_string()).collect(),
                    span,
                )
            })
        }
        other => Err(RuntimeError::type_mismatch(
            "crypt, grimoire or soul",
            other.type_name(),
            "indexing",
            span,
        )
        .with_message(format!("Cannot index {}", other.type_name()))),
    }
}

pub fn index_set(object: &Value, index: &Value, value: Value, span: Span) -> Result<(), RuntimeError> {
    match object {
        Value::Array(items) => {
            let i = index.expect_int("array index", span)?;
            let mut items = items.write();
            let len = items.len();
            let pos = normalize_index(i, len)
                .ok_or_else(|| RuntimeError::index_out_of_bounds("array", adjusted(i, len), len, span))?;
            items[pos] = value;
            Ok(())
        }
        Value::Map(map) => {
            let key = HashKey::from_value(index, span)?;
            map.write().insert(key, value);
            Ok(())
        }
        other => Err(RuntimeError::type_mismatch(
            "crypt or grimoire",
            other.type_name(),
            "index assignment",
            span,
        )
        .with_message(format!("Cannot assign to index of {}", other.type_name()))),
    }
}

/// Positions selected by `[start:end:step]` over a sequence of `len`.
pub fn slice_range(
    len: usize,
    start: Option<i64>,
    end: Option<i64>,
    step: i64,
) -> impl Iterator<Item = usize> {
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let (from, to) = if step > 0 {
        (
            start.map_or(0, |s| clamp(s, 0, len)),
            end.map_or(len, |e| clamp(e, 0, len)),
        )
    } else {
        (
            start.map_or(len - 1, |s| clamp(s, -1, len - 1)),
            end.map_or(-1, |e| clamp(e, -1, len - 1)),
        )
    };
    let mut current = from;
    std::iter::from_fn(move || {
        let more = if step > 0 { current < to } else { current > to };
        if !more {
            return None;
        }
        let pos = current as usize;
        current += step;
        Some(pos)
    })
}

fn optional_int(value: Option<&Value>, context: &str, span: Span) -> Result<Option<i64>, RuntimeError> {
    match value {
        None | Some(Value::Void) => Ok(None),
        Some(v) => v.expect_int(context, span).map(Some),
    }
}

pub fn slice(
    object: &Value,
    start: Option<&Value>,
    end: Option<&Value>,
    step: Option<&Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    let start = optional_int(start, "slice start", span)?;
    let end = optional_int(end, "slice end", span)?;
    let step = optional_int(step, "slice step", span)?.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::new("slice step cannot be zero", span));
    }
    match object {
        Value::Array(items) => {
            let items = items.read();
            let picked = slice_range(items.len(), start, end, step)
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::array(picked))
        }
        Value::Text(text) => {
            let chars: Vec<char> = text.chars().collect();
            let picked: String = slice_range(chars.len(), start, end, step)
                .map(|i| chars[i])
                .collect();
            Ok(Value::Text(picked))
        }
        other => Err(RuntimeError::type_mismatch(
            "crypt or soul",
            other.type_name(),
            "slicing",
            span,
        )
        .with_message(format!("Cannot slice {}", other.type_name()))),
    }
}

/// Elements visited by `decay` and comprehensions: array items, text
/// characters, or mapping keys in insertion order.
pub fn iterate(value: &Value, span: Span) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::Array(items) => Ok(items.read().clone()),
        Value::Text(text) => Ok(text.chars().map(|c| Value::Text(c.to_string())).collect()),
        Value::Map(map) => Ok(map.read().keys().map(HashKey::to_value).collect()),
        other => Err(RuntimeError::type_mismatch(
            "crypt, soul or grimoire",
            other.type_name(),
            "iteration",
            span,
        )
        .with_message(format!("Cannot iterate over {}", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::new_map;
    use pretty_assertions::assert_eq;

    fn ints(values: &[i64]) -> Value {
        Value::array(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn test_negative_index_wraps() {
        let crypt = ints(&[10, 20, 30]);
        assert_eq!(index_get(&crypt, &Value::Int(-1), Span::default()).unwrap(), Value::Int(30));
        let err = index_get(&crypt, &Value::Int(-5), Span::default()).unwrap_err();
        assert_eq!(err.message, "Array index -2 out of bounds");
        let err = index_get(&crypt, &Value::Int(3), Span::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
    }

    #[test]
    fn test_text_index() {
        let soul = Value::text("bone");
        assert_eq!(index_get(&soul, &Value::Int(1), Span::default()).unwrap(), Value::text("o"));
        let err = index_get(&soul, &Value::Int(9), Span::default()).unwrap_err();
        assert_eq!(err.message, "String index 9 out of bounds");
    }

    #[test]
    fn test_missing_key_lists_available() {
        let mut store = new_map();
        store.insert(HashKey::Text("skull".into()), Value::Int(1));
        let grimoire = Value::map(store);
        let err = index_get(&grimoire, &Value::text("rib"), Span::default()).unwrap_err();
        assert_eq!(err.message, "Key 'rib' not found in dictionary");
        assert_eq!(
            err.detail,
            ErrorDetail::Key {
                key: "'rib'".to_string(),
                available: vec!["skull".to_string()]
            }
        );
    }

    #[test]
    fn test_index_set() {
        let crypt = ints(&[1, 2]);
        index_set(&crypt, &Value::Int(-1), Value::Int(9), Span::default()).unwrap();
        assert_eq!(crypt.to_string(), "[1, 9]");
        assert!(index_set(&Value::text("x"), &Value::Int(0), Value::Int(1), Span::default()).is_err());
    }

    #[test]
    fn test_slices_follow_python_rules() {
        let crypt = ints(&[0, 1, 2, 3, 4, 5]);
        let s = |a: Option<i64>, b: Option<i64>, c: Option<i64>| {
            let (a, b, c) = (a.map(Value::Int), b.map(Value::Int), c.map(Value::Int));
            slice(&crypt, a.as_ref(), b.as_ref(), c.as_ref(), Span::default())
                .unwrap()
                .to_string()
        };
        assert_eq!(s(Some(1), Some(4), None), "[1, 2, 3]");
        assert_eq!(s(None, None, Some(2)), "[0, 2, 4]");
        assert_eq!(s(None, None, Some(-1)), "[5, 4, 3, 2, 1, 0]");
        assert_eq!(s(Some(-2), None, None), "[4, 5]");
        assert_eq!(s(Some(4), Some(1), Some(-2)), "[4, 2]");
        assert_eq!(s(Some(10), Some(20), None), "[]");
    }

    #[test]
    fn test_zero_step_rejected() {
        let step = Value::Int(0);
        assert!(slice(&Value::text("abc"), None, None, Some(&step), Span::default()).is_err());
    }

    #[test]
    fn test_properties() {
        assert_eq!(get_property(&ints(&[1, 2]), "length", Span::default()).unwrap(), Value::Int(2));
        let err = get_property(&ints(&[]), "size", Span::default()).unwrap_err();
        assert_eq!(err.message, "Array property 'size' not found");
        let error = Value::Error(std::sync::Arc::new(RuntimeError::type_error("bad", Span::new(0, 1, 3, 7))));
        assert_eq!(get_property(&error, "type", Span::default()).unwrap(), Value::text("ReaperTypeError"));
        assert_eq!(get_property(&error, "line", Span::default()).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_iteration_order() {
        let mut store = new_map();
        store.insert(HashKey::Text("b".into()), Value::Int(1));
        store.insert(HashKey::Int(7), Value::Int(2));
        let keys = iterate(&Value::map(store), Span::default()).unwrap();
        assert_eq!(keys, vec![Value::text("b"), Value::Int(7)]);
        assert_eq!(iterate(&Value::text("ab"), Span::default()).unwrap().len(), 2);
        assert!(iterate(&Value::Int(3), Span::default()).is_err());
    }
}
