//! Built-in methods on crypts, souls, grimoires and shadows.

use crate::error::{ErrorDetail, ErrorKind, RuntimeError};
use crate::interpreter::builtins::access::{normalize_index, slice_range};
use crate::interpreter::builtins::arity_error;
use crate::interpreter::guard::ResourceGuard;
use crate::interpreter::value::{ArrayRef, HashKey, MapRef, Value};
use crate::span::Span;

/// Method names resolved on a grimoire before its own entries.
pub const DICT_METHODS: [&str; 6] = ["curse", "summon", "banish", "inscribe", "possess", "haunt"];

fn expect_args(name: &str, args: &[Value], expected: usize, span: Span) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(arity_error(name, expected, args.len(), span));
    }
    Ok(())
}

pub fn call_method(
    guard: &mut ResourceGuard,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Array(items) => array_method(guard, items, name, args, span),
        Value::Text(text) => string_method(guard, text, name, args, span),
        Value::Map(map) => dict_method(map, name, args, span),
        Value::Secure(secret) => match name {
            "curse" => {
                expect_args(name, &args, 0, span)?;
                Ok(Value::Int(secret.len() as i64))
            }
            "reveal" => {
                expect_args(name, &args, 0, span)?;
                Ok(Value::Text(secret.reveal()))
            }
            _ => Err(RuntimeError::new(
                format!("Unknown shadow method: {}", name),
                span,
            )),
        },
        other => Err(RuntimeError::type_mismatch(
            "tomb, crypt, soul or grimoire",
            other.type_name(),
            "method call",
            span,
        )
        .with_message(format!("Cannot call method on {}", other.type_name()))),
    }
}

fn array_method(
    guard: &mut ResourceGuard,
    items: &ArrayRef,
    name: &str,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    match name {
        "entomb" => {
            expect_args(name, &args, 1, span)?;
            let len = {
                let mut items = items.write();
                items.extend(args);
                items.len()
            };
            guard.grow_array(len, 1, span)?;
            Ok(Value::Void)
        }
        "exhume" => {
            if args.len() > 1 {
                return Err(arity_error(name, 1, args.len(), span));
            }
            let mut items = items.write();
            let len = items.len();
            let index = match args.first() {
                Some(index) => index.expect_int("exhume index", span)?,
                None => len as i64 - 1,
            };
            let Some(position) = normalize_index(index, len) else {
                return Err(RuntimeError::index_out_of_bounds("array", index, len, span));
            };
            Ok(items.remove(position))
        }
        "curse" => {
            expect_args(name, &args, 0, span)?;
            Ok(Value::Int(items.read().len() as i64))
        }
        "resurrect" => {
            expect_args(name, &args, 0, span)?;
            items.write().reverse();
            Ok(Value::Void)
        }
        "haunt" => {
            expect_args(name, &args, 1, span)?;
            Ok(Value::Bool(items.read().contains(&args[0])))
        }
        _ => Err(RuntimeError::new(
            format!("Unknown array method: {}", name),
            span,
        )),
    }
}

fn string_method(
    guard: &mut ResourceGuard,
    text: &str,
    name: &str,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    match name {
        "curse" => {
            expect_args(name, &args, 0, span)?;
            Ok(Value::Int(text.chars().count() as i64))
        }
        "slice" => {
            expect_args(name, &args, 2, span)?;
            let start = args[0].expect_int("slice start", span)?;
            let end = args[1].expect_int("slice end", span)?;
            let chars: Vec<char> = text.chars().collect();
            let picked: String = slice_range(chars.len(), Some(start), Some(end), 1)
                .map(|i| chars[i])
                .collect();
            Ok(Value::Text(picked))
        }
        "whisper" => {
            expect_args(name, &args, 0, span)?;
            Ok(Value::Text(text.to_lowercase()))
        }
        "scream" => {
            expect_args(name, &args, 0, span)?;
            Ok(Value::Text(text.to_uppercase()))
        }
        "haunt" => {
            expect_args(name, &args, 1, span)?;
            let needle = args[0].expect_text("haunt substring", span)?;
            Ok(Value::Bool(text.contains(needle.as_str())))
        }
        "split" => {
            expect_args(name, &args, 1, span)?;
            let delimiter = args[0].expect_text("split delimiter", span)?;
            if delimiter.is_empty() {
                return Err(RuntimeError::new("empty separator", span));
            }
            let parts: Vec<Value> = text.split(delimiter.as_str()).map(Value::text).collect();
            guard.check_array(parts.len(), span)?;
            Ok(Value::array(parts))
        }
        _ => Err(RuntimeError::new(
            format!("Unknown string method: {}", name),
            span,
        )),
    }
}

fn dict_method(map: &MapRef, name: &str, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
    match name {
        "curse" => {
            expect_args(name, &args, 0, span)?;
            Ok(Value::Int(map.read().len() as i64))
        }
        "summon" => {
            expect_args(name, &args, 1, span)?;
            let key = HashKey::from_value(&args[0], span)?;
            Ok(map.read().get(&key).cloned().unwrap_or(Value::Void))
        }
        "banish" => {
            expect_args(name, &args, 1, span)?;
            let key = HashKey::from_value(&args[0], span)?;
            map.write().shift_remove(&key);
            Ok(Value::Void)
        }
        "inscribe" => {
            expect_args(name, &args, 0, span)?;
            Ok(Value::array(map.read().keys().map(HashKey::to_value).collect()))
        }
        "possess" => {
            expect_args(name, &args, 0, span)?;
            Ok(Value::array(map.read().values().cloned().collect()))
        }
        "haunt" => {
            expect_args(name, &args, 1, span)?;
            let key = HashKey::from_value(&args[0], span)?;
            Ok(Value::Bool(map.read().contains_key(&key)))
        }
        _ => {
            let available: Vec<String> = map.read().keys().map(|k| k.to_string()).collect();
            Err(RuntimeError::with_kind(
                ErrorKind::Key,
                format!("Method '{}' not found", name),
                span,
            )
            .with_detail(ErrorDetail::Key {
                key: name.to_string(),
                available,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::interpreter::value::new_map;
    use pretty_assertions::assert_eq;

    fn guard() -> ResourceGuard {
        ResourceGuard::new(&EngineConfig::default())
    }

    fn call(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        call_method(&mut guard(), receiver, name, args, Span::default())
    }

    #[test]
    fn test_array_methods_mutate_in_place() {
        let crypt = Value::array(vec![Value::Int(1), Value::Int(2)]);
        call(&crypt, "entomb", vec![Value::Int(3)]).unwrap();
        assert_eq!(call(&crypt, "curse", vec![]).unwrap(), Value::Int(3));
        call(&crypt, "resurrect", vec![]).unwrap();
        assert_eq!(crypt.to_string(), "[3, 2, 1]");
        assert_eq!(call(&crypt, "exhume", vec![Value::Int(0)]).unwrap(), Value::Int(3));
        assert_eq!(call(&crypt, "exhume", vec![]).unwrap(), Value::Int(1));
        assert_eq!(call(&crypt, "haunt", vec![Value::Int(2)]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_exhume_empty_is_index_error() {
        let crypt = Value::array(vec![]);
        let err = call(&crypt, "exhume", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
    }

    #[test]
    fn test_string_methods() {
        let soul = Value::text("Grave Digger");
        assert_eq!(call(&soul, "whisper", vec![]).unwrap(), Value::text("grave digger"));
        assert_eq!(call(&soul, "scream", vec![]).unwrap(), Value::text("GRAVE DIGGER"));
        assert_eq!(call(&soul, "slice", vec![Value::Int(0), Value::Int(5)]).unwrap(), Value::text("Grave"));
        assert_eq!(call(&soul, "slice", vec![Value::Int(-6), Value::Int(99)]).unwrap(), Value::text("Digger"));
        assert_eq!(
            call(&soul, "split", vec![Value::text(" ")]).unwrap().to_string(),
            "['Grave', 'Digger']"
        );
        let err = call(&soul, "shout", vec![]).unwrap_err();
        assert_eq!(err.message, "Unknown string method: shout");
    }

    #[test]
    fn test_dict_methods() {
        let mut store = new_map();
        store.insert(HashKey::Text("a".into()), Value::Int(1));
        let grimoire = Value::map(store);
        assert_eq!(call(&grimoire, "summon", vec![Value::text("a")]).unwrap(), Value::Int(1));
        assert_eq!(call(&grimoire, "summon", vec![Value::text("b")]).unwrap(), Value::Void);
        assert_eq!(call(&grimoire, "inscribe", vec![]).unwrap().to_string(), "['a']");
        call(&grimoire, "banish", vec![Value::text("a")]).unwrap();
        assert_eq!(call(&grimoire, "curse", vec![]).unwrap(), Value::Int(0));
        let err = call(&grimoire, "chant", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Key);
    }

    #[test]
    fn test_arity_checked() {
        let crypt = Value::array(vec![]);
        let err = call(&crypt, "entomb", vec![]).unwrap_err();
        assert_eq!(err.message, "entomb() expects 1 argument, got 0");
    }

    #[test]
    fn test_secure_methods() {
        let secret = Value::secure("pin");
        assert_eq!(call(&secret, "curse", vec![]).unwrap(), Value::Int(3));
        assert_eq!(call(&secret, "reveal", vec![]).unwrap(), Value::text("pin"));
    }
}
