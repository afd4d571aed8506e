//! Error types for all phases.

use std::fmt;

use crate::span::Span;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Clone, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unclosed string at {0}")]
    UnterminatedString(Span),

    #[error("Unclosed multi-line comment at {0}")]
    UnclosedComment(Span),

    #[error("Unclosed interpolation expression at {0}")]
    UnclosedInterpolation(Span),

    #[error("Invalid Unicode escape sequence at {0}")]
    InvalidUnicodeEscape(Span),

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
}

impl LexerError {
    pub fn unexpected_char(c: char, span: Span) -> Self {
        Self::UnexpectedChar(c, span)
    }

    pub fn unterminated_string(span: Span) -> Self {
        Self::UnterminatedString(span)
    }

    pub fn invalid_number(s: impl Into<String>, span: Span) -> Self {
        Self::InvalidNumber(s.into(), span)
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::UnclosedComment(span) => *span,
            Self::UnclosedInterpolation(span) => *span,
            Self::InvalidUnicodeEscape(span) => *span,
            Self::InvalidNumber(_, span) => *span,
        }
    }
}

/// Parser errors.
#[derive(Debug, Clone, Error)]
pub enum ParserError {
    #[error("Unexpected token '{found}', expected {expected} at {span}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl ParserError {
    pub fn unexpected_token(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn general(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::General { span, .. } => *span,
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UnexpectedToken {
                expected, found, ..
            } => Some(format!("Expected {}, got {}", expected, found)),
            Self::General { .. } => None,
        }
    }
}

impl From<LexerError> for ParserError {
    fn from(err: LexerError) -> Self {
        Self::General {
            message: err.to_string(),
            span: err.span(),
        }
    }
}

/// Bytecode compilation errors.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("{message} at {span}")]
    General { message: String, span: Span },

    #[error("Unsupported construct '{construct}' in bytecode backend at {span}")]
    Unsupported { construct: String, span: Span },
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        Self::Unsupported {
            construct: construct.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::General { span, .. } => *span,
            Self::Unsupported { span, .. } => *span,
        }
    }
}

/// Errors reading or writing the REAP bytecode format.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SerializeError {
    #[error("Unexpected end of bytecode at offset {offset} (needed {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("Invalid magic number: expected REAP")]
    BadMagic,

    #[error("Unsupported bytecode version {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid opcode 0x{0:02X} at offset {1}")]
    InvalidOpcode(u8, usize),

    #[error("Invalid operand type tag 0x{0:02X} at offset {1}")]
    InvalidOperandTag(u8, usize),

    #[error("Invalid constant type tag {0:?} at offset {1}")]
    InvalidConstantTag(String, usize),

    #[error("Invalid UTF-8 text at offset {0}")]
    InvalidUtf8(usize),

    #[error("Integer operand {0} does not fit in 32 bits")]
    OperandOutOfRange(i64),

    #[error("{what} too long to encode ({len})")]
    TooLong { what: &'static str, len: usize },

    #[error("Constant of type {0} cannot be stored in the constant pool")]
    UnsupportedConstant(&'static str),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config file '{path}': {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// The closed runtime error taxonomy. Every kind is a direct child of
/// `ReaperError`, which therefore matches all of them in a `catch` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Runtime,
    Syntax,
    Type,
    Recursion,
    Memory,
    Index,
    Key,
    ZeroDivision,
}

pub const BASE_ERROR_NAME: &str = "ReaperError";

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Runtime,
        ErrorKind::Syntax,
        ErrorKind::Type,
        ErrorKind::Recursion,
        ErrorKind::Memory,
        ErrorKind::Index,
        ErrorKind::Key,
        ErrorKind::ZeroDivision,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Runtime => "ReaperRuntimeError",
            ErrorKind::Syntax => "ReaperSyntaxError",
            ErrorKind::Type => "ReaperTypeError",
            ErrorKind::Recursion => "ReaperRecursionError",
            ErrorKind::Memory => "ReaperMemoryError",
            ErrorKind::Index => "ReaperIndexError",
            ErrorKind::Key => "ReaperKeyError",
            ErrorKind::ZeroDivision => "ReaperZeroDivisionError",
        }
    }

    /// Resolve a type name as written in `catch`/`throw`. Accepts both the
    /// full name and the name without the `Reaper` prefix.
    pub fn from_name(name: &str) -> Option<ErrorKind> {
        let bare = name.strip_prefix("Reaper").unwrap_or(name);
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().strip_prefix("Reaper") == Some(bare))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn is_base_error_name(name: &str) -> bool {
    name == BASE_ERROR_NAME || name == "Error"
}

/// Kind-specific context attached to a runtime error.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ErrorDetail {
    #[default]
    None,
    Type {
        expected: String,
        actual: String,
        operation: String,
    },
    Recursion {
        depth: usize,
        max: usize,
    },
    Memory {
        resource: String,
        current: usize,
        max: usize,
    },
    Index {
        collection: String,
        index: i64,
        size: usize,
    },
    Key {
        key: String,
        available: Vec<String>,
    },
    Undefined {
        name: String,
        available: Vec<String>,
    },
    ZeroDivision {
        expression: String,
    },
    Exit {
        code: i32,
    },
}

/// One frame of the logical call stack captured while an error unwinds.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub function: String,
    pub span: Span,
}

/// A typed runtime failure raised by either execution engine.
#[derive(Debug, Clone, Error)]
#[error("{}: {}{}", .kind.name(), .message, location_suffix(.span))]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub detail: ErrorDetail,
    pub trace: Vec<TraceFrame>,
}

fn location_suffix(span: &Span) -> String {
    if span.is_unknown() {
        String::new()
    } else {
        format!(" at {}", span)
    }
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::with_kind(ErrorKind::Runtime, message, span)
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            detail: ErrorDetail::None,
            trace: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::with_kind(ErrorKind::Type, message, span)
    }

    pub fn type_mismatch(
        expected: impl Into<String>,
        actual: impl Into<String>,
        operation: impl Into<String>,
        span: Span,
    ) -> Self {
        let (expected, actual, operation) = (expected.into(), actual.into(), operation.into());
        Self::type_error(
            format!(
                "Unsupported operand for {}: expected {}, got {}",
                operation, expected, actual
            ),
            span,
        )
        .with_detail(ErrorDetail::Type {
            expected,
            actual,
            operation,
        })
    }

    pub fn recursion(depth: usize, max: usize, span: Span) -> Self {
        Self::with_kind(
            ErrorKind::Recursion,
            "Maximum recursion depth exceeded",
            span,
        )
        .with_detail(ErrorDetail::Recursion { depth, max })
    }

    pub fn memory(
        message: impl Into<String>,
        resource: impl Into<String>,
        current: usize,
        max: usize,
        span: Span,
    ) -> Self {
        Self::with_kind(ErrorKind::Memory, message, span).with_detail(ErrorDetail::Memory {
            resource: resource.into(),
            current,
            max,
        })
    }

    pub fn index_out_of_bounds(
        collection: impl Into<String>,
        index: i64,
        size: usize,
        span: Span,
    ) -> Self {
        let collection = collection.into();
        let noun = if collection == "text" { "String" } else { "Array" };
        Self::with_kind(
            ErrorKind::Index,
            format!("{} index {} out of bounds", noun, index),
            span,
        )
        .with_detail(ErrorDetail::Index {
            collection,
            index,
            size,
        })
    }

    pub fn key_not_found(key: impl Into<String>, available: Vec<String>, span: Span) -> Self {
        let key = key.into();
        Self::with_kind(
            ErrorKind::Key,
            format!("Key {} not found in dictionary", key),
            span,
        )
        .with_detail(ErrorDetail::Key { key, available })
    }

    pub fn property_not_found(name: &str, available: Vec<String>, span: Span) -> Self {
        Self::with_kind(ErrorKind::Key, format!("Property '{}' not found", name), span)
            .with_detail(ErrorDetail::Key {
                key: name.to_string(),
                available,
            })
    }

    pub fn undefined_variable(name: impl Into<String>, available: Vec<String>, span: Span) -> Self {
        let name = name.into();
        let mut message = format!("Undefined variable '{}'", name);
        if !available.is_empty() {
            message.push_str(&format!(" Available names: {}", available.join(", ")));
        }
        Self::new(message, span).with_detail(ErrorDetail::Undefined { name, available })
    }

    pub fn division_by_zero(expression: impl Into<String>, span: Span) -> Self {
        Self::with_kind(ErrorKind::ZeroDivision, "Division by zero", span).with_detail(
            ErrorDetail::ZeroDivision {
                expression: expression.into(),
            },
        )
    }

    pub fn modulo_by_zero(expression: impl Into<String>, span: Span) -> Self {
        Self::with_kind(ErrorKind::ZeroDivision, "Modulo by zero", span).with_detail(
            ErrorDetail::ZeroDivision {
                expression: expression.into(),
            },
        )
    }

    /// Raised by `final_rest(code)`; never matched by `catch`.
    pub fn exit(code: i32, span: Span) -> Self {
        Self::new(format!("Program exited with status {}", code), span)
            .with_detail(ErrorDetail::Exit { code })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.detail {
            ErrorDetail::Exit { code } => Some(code),
            _ => None,
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// Attach a position if the error was raised without one.
    pub fn at(mut self, span: Span) -> Self {
        if self.span.is_unknown() {
            self.span = span;
        }
        self
    }

    pub fn push_frame(&mut self, function: impl Into<String>, span: Span) {
        self.trace.push(TraceFrame {
            function: function.into(),
            span,
        });
    }

    /// Whether a `catch (requested)` clause accepts this error.
    pub fn matches(&self, requested: &str) -> bool {
        if is_base_error_name(requested) {
            return true;
        }
        ErrorKind::from_name(requested) == Some(self.kind)
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum ReaperError {
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Bytecode error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReaperError {
    pub fn span(&self) -> Option<Span> {
        let span = match self {
            Self::Lexer(e) => e.span(),
            Self::Parser(e) => e.span(),
            Self::Compile(e) => e.span(),
            Self::Runtime(e) => e.span(),
            Self::Serialize(_) | Self::Config(_) | Self::Io(_) => return None,
        };
        (!span.is_unknown()).then_some(span)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Lexer(_) | Self::Parser(_) => ErrorKind::Syntax.name(),
            Self::Compile(_) => "CompileError",
            Self::Serialize(_) => "BytecodeFormatError",
            Self::Runtime(e) => e.kind.name(),
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
        }
    }

    fn bare_message(&self) -> String {
        match self {
            Self::Lexer(e) => strip_location(&e.to_string()),
            Self::Parser(e) => strip_location(&e.to_string()),
            Self::Compile(e) => strip_location(&e.to_string()),
            Self::Runtime(e) => e.message.clone(),
            Self::Serialize(e) => e.to_string(),
            Self::Config(e) => e.to_string(),
            Self::Io(e) => e.to_string(),
        }
    }

    /// `{file}:{line}:{col}: {Kind}: {message}` followed by a caret
    /// excerpt of the offending line, an optional suggestion and the trace.
    pub fn render(&self, source: &str, filename: &str) -> String {
        let mut out = String::new();
        match self.span() {
            Some(span) => out.push_str(&format!(
                "{}:{}:{}: {}: {}",
                filename,
                span.line,
                span.column,
                self.kind_name(),
                self.bare_message()
            )),
            None => out.push_str(&format!(
                "{}: {}: {}",
                filename,
                self.kind_name(),
                self.bare_message()
            )),
        }

        if let Some(span) = self.span() {
            if let Some(line_text) = source.lines().nth(span.line.saturating_sub(1)) {
                let gutter = span.line.to_string().len();
                let width = if span.end > span.start {
                    (span.end - span.start)
                        .min(line_text.len().saturating_sub(span.column - 1))
                        .max(1)
                } else {
                    1
                };
                out.push_str(&format!("\n{} |", " ".repeat(gutter)));
                out.push_str(&format!("\n{} | {}", span.line, line_text));
                out.push_str(&format!(
                    "\n{} | {}{}",
                    " ".repeat(gutter),
                    " ".repeat(span.column.saturating_sub(1)),
                    "^".repeat(width)
                ));
            }
        }

        if let Self::Parser(e) = self {
            if let Some(suggestion) = e.suggestion() {
                out.push_str(&format!("\n  Suggestion: {}", suggestion));
            }
        }

        if let Self::Runtime(e) = self {
            if !e.trace.is_empty() {
                out.push_str("\n\nStack trace:");
                render_trace(&mut out, &e.trace, filename);
            }
        }
        out
    }
}

/// Frames of one repeated run printed before it is collapsed.
const TRACE_REPEAT_SHOWN: usize = 3;
/// Frames printed in total before the rest is summarised.
const TRACE_FRAMES_SHOWN: usize = 20;

/// Consecutive identical frames (same function and line) collapse into a
/// "repeated" note; the listing stops after `TRACE_FRAMES_SHOWN` frames.
fn render_trace(out: &mut String, trace: &[TraceFrame], filename: &str) {
    let mut shown = 0;
    let mut index = 0;
    while index < trace.len() && shown < TRACE_FRAMES_SHOWN {
        let frame = &trace[index];
        let run = trace[index..]
            .iter()
            .take_while(|f| f.function == frame.function && f.span.line == frame.span.line)
            .count();
        let printed = run.min(TRACE_REPEAT_SHOWN).min(TRACE_FRAMES_SHOWN - shown);
        for offset in 0..printed {
            out.push_str(&format!(
                "\n  {}. {} at {}:{}",
                index + offset + 1,
                frame.function,
                filename,
                frame.span.line
            ));
        }
        shown += printed;
        if run > printed {
            out.push_str(&format!(
                "\n  [previous frame repeated {} more times]",
                run - printed
            ));
        }
        index += run;
    }
    if index < trace.len() {
        out.push_str(&format!("\n  ... {} more frames", trace.len() - index));
    }
}

fn strip_location(message: &str) -> String {
    match message.rfind(" at ") {
        Some(idx) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_lookup_accepts_short_names() {
        assert_eq!(ErrorKind::from_name("ReaperTypeError"), Some(ErrorKind::Type));
        assert_eq!(ErrorKind::from_name("TypeError"), Some(ErrorKind::Type));
        assert_eq!(
            ErrorKind::from_name("ZeroDivisionError"),
            Some(ErrorKind::ZeroDivision)
        );
        assert_eq!(ErrorKind::from_name("ValueError"), None);
    }

    #[test]
    fn test_base_name_matches_every_kind() {
        for kind in ErrorKind::ALL {
            let err = RuntimeError::with_kind(kind, "boom", Span::default());
            assert!(err.matches("ReaperError"));
            assert!(err.matches(kind.name()));
        }
        let err = RuntimeError::type_error("bad", Span::default());
        assert!(!err.matches("ReaperKeyError"));
    }

    #[test]
    fn test_runtime_display_includes_kind_and_position() {
        let err = RuntimeError::division_by_zero("x / y", Span::new(4, 9, 1, 5));
        assert_eq!(err.to_string(), "ReaperZeroDivisionError: Division by zero at 1:5");
        let err = RuntimeError::new("boom", Span::default());
        assert_eq!(err.to_string(), "ReaperRuntimeError: boom");
    }

    #[test]
    fn test_render_underlines_source() {
        let source = "corpse x = 1;\nharvest x / 0;";
        let err: ReaperError =
            RuntimeError::division_by_zero("x / 0", Span::new(22, 27, 2, 9)).into();
        let rendered = err.render(source, "main.reap");
        let mut lines = rendered.lines();
        assert_eq!(
            lines.next(),
            Some("main.reap:2:9: ReaperZeroDivisionError: Division by zero")
        );
        assert!(rendered.contains("2 | harvest x / 0;"));
        assert!(rendered.contains(&format!(" | {}^^^^^", " ".repeat(8))));
    }

    #[test]
    fn test_render_collapses_repeated_frames() {
        let mut err = RuntimeError::with_kind(ErrorKind::Recursion, "too deep", Span::new(0, 1, 1, 1));
        for _ in 0..1000 {
            err.push_frame("dive", Span::new(0, 1, 1, 1));
        }
        err.push_frame("main", Span::new(30, 31, 2, 1));
        let rendered = ReaperError::from(err).render("", "deep.reap");
        assert!(rendered.contains("  3. dive at deep.reap:1"));
        assert!(!rendered.contains("  4. dive"));
        assert!(rendered.contains("[previous frame repeated 997 more times]"));
        assert!(rendered.contains("  1001. main at deep.reap:2"));
        assert!(rendered.lines().count() < 20);
    }

    #[test]
    fn test_render_caps_distinct_frames() {
        let mut err = RuntimeError::new("boom", Span::new(0, 1, 1, 1));
        for line in 1..=30 {
            err.push_frame(format!("f{}", line), Span::new(0, 1, line, 1));
        }
        let rendered = ReaperError::from(err).render("", "wide.reap");
        assert!(rendered.contains("  20. f20 at wide.reap:20"));
        assert!(!rendered.contains("f21"));
        assert!(rendered.ends_with("  ... 10 more frames"));
    }

    #[test]
    fn test_parser_suggestion() {
        let err = ParserError::unexpected_token(";", "}", Span::new(0, 1, 1, 1));
        assert_eq!(err.suggestion().as_deref(), Some("Expected ;, got }"));
    }
}
