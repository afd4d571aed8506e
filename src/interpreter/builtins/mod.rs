//! Built-in functions, methods and collection access for REAPER.
//!
//! Both engines dispatch here through the [`Host`] trait, so a builtin
//! behaves the same whether it is reached from the tree-walker or the VM.

pub mod access;
pub mod methods;

use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, RuntimeError};
use crate::interpreter::environment::Environment;
use crate::interpreter::guard::ResourceGuard;
use crate::interpreter::ops;
use crate::interpreter::value::{format_float, Value};
use crate::span::Span;

pub use access::{get_property, index_get, index_set, iterate, set_property, slice};
pub use methods::call_method;

/// What a builtin needs from the engine running it.
pub trait Host {
    fn write_line(&mut self, line: &str);
    fn read_line(&mut self) -> Option<String>;
    fn guard(&mut self) -> &mut ResourceGuard;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Harvest,
    Rest,
    RaiseCorpse,
    RaisePhantom,
    StealSoul,
    Summon,
    FinalRest,
    Curse,
    Absolute,
    Lesser,
    Greater,
    Excavate,
    Bury,
}

impl Builtin {
    pub const ALL: [Builtin; 13] = [
        Builtin::Harvest,
        Builtin::Rest,
        Builtin::RaiseCorpse,
        Builtin::RaisePhantom,
        Builtin::StealSoul,
        Builtin::Summon,
        Builtin::FinalRest,
        Builtin::Curse,
        Builtin::Absolute,
        Builtin::Lesser,
        Builtin::Greater,
        Builtin::Excavate,
        Builtin::Bury,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Harvest => "harvest",
            Builtin::Rest => "rest",
            Builtin::RaiseCorpse => "raise_corpse",
            Builtin::RaisePhantom => "raise_phantom",
            Builtin::StealSoul => "steal_soul",
            Builtin::Summon => "summon",
            Builtin::FinalRest => "final_rest",
            Builtin::Curse => "curse",
            Builtin::Absolute => "absolute",
            Builtin::Lesser => "lesser",
            Builtin::Greater => "greater",
            Builtin::Excavate => "excavate",
            Builtin::Bury => "bury",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.iter().copied().find(|b| b.name() == name)
    }

    /// Fixed argument count; `None` for variadic `harvest`.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Builtin::Harvest => None,
            Builtin::Summon => Some(0),
            Builtin::Curse | Builtin::Lesser | Builtin::Greater | Builtin::Bury => Some(2),
            _ => Some(1),
        }
    }
}

/// Seed the root scope: constants, builtin functions and `ritual_args`.
pub fn register_builtins(env: &mut Environment, args: &[String]) {
    env.define_builtin("DEAD", Value::Int(0));
    env.define_builtin("RISEN", Value::Int(1));
    env.define_builtin("void", Value::Void);
    for builtin in Builtin::ALL {
        env.define_builtin(builtin.name(), Value::Builtin(builtin));
    }
    let args = args.iter().map(|a| Value::text(a.as_str())).collect();
    env.define_builtin("ritual_args", Value::array(args));
}

/// `name() expects N argument(s), got M`
pub fn arity_error(name: &str, expected: usize, got: usize, span: Span) -> RuntimeError {
    let noun = if expected == 1 { "argument" } else { "arguments" };
    RuntimeError::new(
        format!("{}() expects {} {}, got {}", name, expected, noun, got),
        span,
    )
}

/// Print form used by `harvest`: every argument's display, no separator.
pub fn harvest_line(args: &[Value]) -> String {
    args.iter().map(|v| v.to_string()).collect()
}

pub fn call_builtin<H: Host + ?Sized>(
    host: &mut H,
    builtin: Builtin,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    if let Some(expected) = builtin.arity() {
        if args.len() != expected {
            return Err(arity_error(builtin.name(), expected, args.len(), span));
        }
    }

    match builtin {
        Builtin::Harvest => {
            host.write_line(&harvest_line(&args));
            Ok(Value::Void)
        }
        Builtin::Rest => {
            let ms = args[0].expect_int("rest duration", span)?;
            if ms < 0 {
                return Err(RuntimeError::new("Rest duration cannot be negative", span));
            }
            host.guard().rest(ms as u64, span)?;
            Ok(Value::Void)
        }
        Builtin::RaiseCorpse => {
            let text = args[0].expect_text("raise_corpse argument", span)?;
            text.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                RuntimeError::type_mismatch("integer", "soul", "string to integer conversion", span)
                    .with_message(format!("Cannot convert '{}' to integer", text))
            })
        }
        Builtin::RaisePhantom => {
            let text = args[0].expect_text("raise_phantom argument", span)?;
            text.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                RuntimeError::type_mismatch("phantom", "soul", "string to float conversion", span)
                    .with_message(format!("Cannot convert '{}' to phantom (float)", text))
            })
        }
        Builtin::StealSoul => match &args[0] {
            Value::Int(n) => Ok(Value::text(n.to_string())),
            Value::Float(n) => Ok(Value::text(format_float(*n))),
            other => Err(RuntimeError::type_mismatch(
                "corpse or phantom",
                other.type_name(),
                "type conversion",
                span,
            )
            .with_message(format!("Cannot convert {} to string", other.type_name()))),
        },
        Builtin::Summon => Ok(host.read_line().map(Value::Text).unwrap_or(Value::Void)),
        Builtin::FinalRest => {
            let code = args[0].expect_int("final_rest exit code", span)?;
            let code = i32::try_from(code).map_err(|_| {
                RuntimeError::new(format!("Exit code {} out of range", code), span)
            })?;
            Err(RuntimeError::exit(code, span))
        }
        Builtin::Curse => {
            let message = args[1].expect_text("curse message", span)?;
            if !ops::truthy(&args[0], span)? {
                return Err(RuntimeError::new(
                    format!("Assertion failed: {}", message),
                    span,
                ));
            }
            Ok(Value::Void)
        }
        Builtin::Absolute => match &args[0] {
            Value::Int(n) => n
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::new("Integer overflow", span)),
            Value::Float(n) => Ok(Value::Float(n.abs())),
            other => Err(RuntimeError::type_mismatch(
                "corpse or phantom",
                other.type_name(),
                "absolute value",
                span,
            )),
        },
        Builtin::Lesser | Builtin::Greater => {
            let (a, b) = (&args[0], &args[1]);
            if !a.is_numeric() || !b.is_numeric() {
                let operation = if builtin == Builtin::Lesser { "minimum" } else { "maximum" };
                return Err(RuntimeError::type_mismatch(
                    "corpse or phantom",
                    format!("{} and {}", a.type_name(), b.type_name()),
                    operation,
                    span,
                ));
            }
            let op = if builtin == Builtin::Lesser {
                crate::ast::BinaryOp::Less
            } else {
                crate::ast::BinaryOp::Greater
            };
            // The first argument wins ties.
            let pick_second = matches!(ops::compare(op, b, a, span)?, Value::Bool(true));
            Ok(if pick_second { b.clone() } else { a.clone() })
        }
        Builtin::Excavate => {
            let path = args[0].expect_text("excavate file path", span)?;
            let content = excavate(&path, host.guard().max_file_size(), span)?;
            host.guard().check_string(content.len(), span)?;
            Ok(Value::Text(content))
        }
        Builtin::Bury => {
            let path = args[0].expect_text("bury file path", span)?;
            let content = args[1].expect_text("bury content", span)?;
            bury(&path, &content, host.guard().max_file_size(), span)?;
            Ok(Value::Void)
        }
    }
}

fn resolve_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn io_error(action: &str, path: &str, err: std::io::Error, span: Span) -> RuntimeError {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        RuntimeError::new(format!("Permission denied: {}", path), span)
    } else {
        RuntimeError::new(format!("Error {} file '{}': {}", action, path, err), span)
    }
}

fn excavate(path: &str, max_size: usize, span: Span) -> Result<String, RuntimeError> {
    let resolved = resolve_path(path);
    let metadata = std::fs::metadata(&resolved)
        .map_err(|_| RuntimeError::new(format!("File not found: {}", path), span))?;
    if !metadata.is_file() {
        return Err(RuntimeError::new(
            format!("Path is not a file: {}", path),
            span,
        ));
    }
    let size = metadata.len() as usize;
    if size > max_size {
        return Err(RuntimeError::memory(
            format!("File too large: {} bytes (max {})", size, max_size),
            "file",
            size,
            max_size,
            span,
        ));
    }
    let bytes = std::fs::read(&resolved).map_err(|e| io_error("reading", path, e, span))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn bury(path: &str, content: &str, max_size: usize, span: Span) -> Result<(), RuntimeError> {
    let resolved = resolve_path(path);
    if let Some(parent) = resolved.parent() {
        if !parent.exists() {
            return Err(RuntimeError::new(
                format!("Parent directory does not exist: {}", parent.display()),
                span,
            ));
        }
    }
    if content.len() > max_size {
        return Err(RuntimeError::memory(
            format!("Content too large: {} bytes (max {})", content.len(), max_size),
            "file content",
            content.len(),
            max_size,
            span,
        ));
    }
    std::fs::write(&resolved, content).map_err(|e| io_error("writing", path, e, span))
}

/// Kind used for an error raised by `throw` with an unknown or absent type.
pub fn throw_kind(name: Option<&str>) -> ErrorKind {
    name.and_then(ErrorKind::from_name)
        .unwrap_or(ErrorKind::Runtime)
}
