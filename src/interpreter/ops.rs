//! Operator semantics shared by the interpreter, the VM and constant folding.

use std::sync::Arc;

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::RuntimeError;
use crate::interpreter::secure::SecureString;
use crate::interpreter::value::Value;
use crate::span::Span;

pub type OpResult = Result<Value, RuntimeError>;

/// Truthiness: booleans as-is, nonzero integers, non-empty text and
/// collections; `void` is false; anything else is a type error.
pub fn truthy(value: &Value, span: Span) -> Result<bool, RuntimeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(n) => Ok(*n != 0),
        Value::Text(s) => Ok(!s.is_empty()),
        Value::Array(items) => Ok(!items.read().is_empty()),
        Value::Map(map) => Ok(!map.read().is_empty()),
        Value::Void => Ok(false),
        other => Err(RuntimeError::type_mismatch(
            "wraith",
            other.type_name(),
            "boolean conversion",
            span,
        )
        .with_message(format!("Cannot convert {} to boolean", other.type_name()))),
    }
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value, span: Span) -> OpResult {
    match op {
        BinaryOp::Add => add(left, right, span),
        BinaryOp::Subtract => subtract(left, right, span),
        BinaryOp::Multiply => multiply(left, right, span),
        BinaryOp::Divide => divide(left, right, span),
        BinaryOp::Modulo => modulo(left, right, span),
        BinaryOp::Equal => Ok(Value::Bool(left == right)),
        BinaryOp::NotEqual => Ok(Value::Bool(left != right)),
        BinaryOp::Less
        | BinaryOp::LessEqual
        | BinaryOp::Greater
        | BinaryOp::GreaterEqual => compare(op, left, right, span),
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::RotateLeft => {
            bitwise(op, left, right, span)
        }
    }
}

pub fn unary(op: UnaryOp, operand: &Value, span: Span) -> OpResult {
    match op {
        UnaryOp::Negate => negate(operand, span),
        UnaryOp::Not => Ok(Value::Bool(!truthy(operand, span)?)),
        UnaryOp::BitNot => bit_not(operand, span),
    }
}

fn overflow(span: Span) -> RuntimeError {
    RuntimeError::new("Integer overflow", span)
}

fn mismatch(operation: &str, left: &Value, right: &Value, span: Span) -> RuntimeError {
    RuntimeError::type_mismatch(
        "corpse or phantom",
        format!("{} and {}", left.type_name(), right.type_name()),
        operation,
        span,
    )
}

/// Numeric pair with integer arithmetic when both sides are integers.
enum Numbers {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numbers(left: &Value, right: &Value) -> Option<Numbers> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(Numbers::Ints(*a, *b)),
        _ => Some(Numbers::Floats(left.as_f64()?, right.as_f64()?)),
    }
}

pub fn add(left: &Value, right: &Value, span: Span) -> OpResult {
    match (left, right) {
        (Value::Secure(a), Value::Secure(b)) => {
            let mut bytes = a.to_bytes();
            bytes.extend(b.to_bytes());
            Ok(Value::Secure(Arc::new(SecureString::from_bytes(bytes))))
        }
        (Value::Secure(a), Value::Text(b)) => {
            let mut bytes = a.to_bytes();
            bytes.extend_from_slice(b.as_bytes());
            Ok(Value::Secure(Arc::new(SecureString::from_bytes(bytes))))
        }
        (Value::Text(a), Value::Secure(b)) => {
            let mut bytes = a.as_bytes().to_vec();
            bytes.extend(b.to_bytes());
            Ok(Value::Secure(Arc::new(SecureString::from_bytes(bytes))))
        }
        (Value::Text(a), b) => Ok(Value::Text(format!("{}{}", a, b))),
        (a, Value::Text(b)) => Ok(Value::Text(format!("{}{}", a, b))),
        _ => match numbers(left, right) {
            Some(Numbers::Ints(a, b)) => a.checked_add(b).map(Value::Int).ok_or_else(|| overflow(span)),
            Some(Numbers::Floats(a, b)) => Ok(Value::Float(a + b)),
            None => Err(mismatch("addition", left, right, span)),
        },
    }
}

pub fn subtract(left: &Value, right: &Value, span: Span) -> OpResult {
    match numbers(left, right) {
        Some(Numbers::Ints(a, b)) => a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow(span)),
        Some(Numbers::Floats(a, b)) => Ok(Value::Float(a - b)),
        None => Err(mismatch("subtraction", left, right, span)),
    }
}

pub fn multiply(left: &Value, right: &Value, span: Span) -> OpResult {
    match numbers(left, right) {
        Some(Numbers::Ints(a, b)) => a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow(span)),
        Some(Numbers::Floats(a, b)) => Ok(Value::Float(a * b)),
        None => Err(mismatch("multiplication", left, right, span)),
    }
}

/// Integer division rounds toward negative infinity; a float operand gives
/// true division.
pub fn divide(left: &Value, right: &Value, span: Span) -> OpResult {
    let pair = numbers(left, right).ok_or_else(|| mismatch("division", left, right, span))?;
    match pair {
        Numbers::Ints(_, 0) => Err(RuntimeError::division_by_zero(
            format!("{} / {}", left, right),
            span,
        )),
        Numbers::Floats(_, b) if b == 0.0 => Err(RuntimeError::division_by_zero(
            format!("{} / {}", left, right),
            span,
        )),
        Numbers::Ints(a, b) => floor_div(a, b).map(Value::Int).ok_or_else(|| overflow(span)),
        Numbers::Floats(a, b) => Ok(Value::Float(a / b)),
    }
}

/// The result takes the sign of the divisor.
pub fn modulo(left: &Value, right: &Value, span: Span) -> OpResult {
    let pair = numbers(left, right).ok_or_else(|| mismatch("modulo", left, right, span))?;
    match pair {
        Numbers::Ints(_, 0) => Err(RuntimeError::modulo_by_zero(
            format!("{} % {}", left, right),
            span,
        )),
        Numbers::Floats(_, b) if b == 0.0 => Err(RuntimeError::modulo_by_zero(
            format!("{} % {}", left, right),
            span,
        )),
        Numbers::Ints(a, b) => floor_mod(a, b).map(Value::Int).ok_or_else(|| overflow(span)),
        Numbers::Floats(a, b) => Ok(Value::Float(a - b * (a / b).floor())),
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

pub fn negate(operand: &Value, span: Span) -> OpResult {
    match operand {
        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| overflow(span)),
        Value::Float(n) => Ok(Value::Float(-n)),
        other => Err(RuntimeError::type_mismatch(
            "corpse or phantom",
            other.type_name(),
            "negation",
            span,
        )),
    }
}

/// Ordering on numeric pairs or text pairs.
pub fn compare(op: BinaryOp, left: &Value, right: &Value, span: Span) -> OpResult {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(mismatch("comparison", left, right, span)),
        },
    };
    let Some(ordering) = ordering else {
        // NaN compares false with everything.
        return Ok(Value::Bool(false));
    };
    let result = match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEqual => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        BinaryOp::GreaterEqual => ordering.is_ge(),
        _ => return Err(RuntimeError::new(format!("'{}' is not a comparison", op), span)),
    };
    Ok(Value::Bool(result))
}

fn expect_bits(value: &Value, operation: &str, span: Span) -> Result<i64, RuntimeError> {
    value.expect_int(operation, span)
}

pub fn bitwise(op: BinaryOp, left: &Value, right: &Value, span: Span) -> OpResult {
    let operation = match op {
        BinaryOp::BitAnd => "bitwise AND",
        BinaryOp::BitOr => "bitwise OR",
        BinaryOp::BitXor => "bitwise XOR",
        BinaryOp::RotateLeft => "bitwise rotate",
        _ => return Err(RuntimeError::new(format!("'{}' is not bitwise", op), span)),
    };
    let a = expect_bits(left, operation, span)?;
    let b = expect_bits(right, operation, span)?;
    let result = match op {
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        _ => rotate_left(a, b),
    };
    Ok(Value::Int(result))
}

/// 32-bit rotate-left; the count is taken modulo 32.
pub fn rotate_left(value: i64, count: i64) -> i64 {
    let bits = (value & 0xFFFF_FFFF) as u32;
    bits.rotate_left((count & 0x1F) as u32) as i64
}

fn shift_count(right: &Value, operation: &str, span: Span) -> Result<u32, RuntimeError> {
    let count = expect_bits(right, operation, span)?;
    u32::try_from(count)
        .ok()
        .filter(|c| *c < 64)
        .ok_or_else(|| RuntimeError::new(format!("Invalid shift count {}", count), span))
}

pub fn shift_left(left: &Value, right: &Value, span: Span) -> OpResult {
    let value = expect_bits(left, "shift left", span)?;
    let count = shift_count(right, "shift left", span)?;
    Ok(Value::Int(value.wrapping_shl(count)))
}

/// Arithmetic shift: the sign bit is kept.
pub fn shift_right(left: &Value, right: &Value, span: Span) -> OpResult {
    let value = expect_bits(left, "shift right", span)?;
    let count = shift_count(right, "shift right", span)?;
    Ok(Value::Int(value >> count))
}

/// Bitwise NOT masked to 32 bits.
pub fn bit_not(operand: &Value, span: Span) -> OpResult {
    let n = expect_bits(operand, "bitwise NOT", span)?;
    Ok(Value::Int(!n & 0xFFFF_FFFF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn sp() -> Span {
        Span::default()
    }

    #[test]
    fn test_numeric_promotion() {
        assert_eq!(add(&Value::Int(2), &Value::Int(3), sp()).unwrap(), Value::Int(5));
        assert!(matches!(
            add(&Value::Int(2), &Value::Float(0.5), sp()).unwrap(),
            Value::Float(f) if f == 2.5
        ));
    }

    #[test]
    fn test_division_rules() {
        assert_eq!(divide(&Value::Int(7), &Value::Int(2), sp()).unwrap(), Value::Int(3));
        assert_eq!(divide(&Value::Int(-7), &Value::Int(2), sp()).unwrap(), Value::Int(-4));
        assert!(matches!(
            divide(&Value::Int(7), &Value::Float(2.0), sp()).unwrap(),
            Value::Float(f) if f == 3.5
        ));
        let err = divide(&Value::Int(5), &Value::Int(0), sp()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        assert_eq!(
            err.detail,
            crate::error::ErrorDetail::ZeroDivision {
                expression: "5 / 0".to_string()
            }
        );
    }

    #[test]
    fn test_modulo_takes_divisor_sign() {
        assert_eq!(modulo(&Value::Int(-7), &Value::Int(3), sp()).unwrap(), Value::Int(2));
        assert_eq!(modulo(&Value::Int(7), &Value::Int(-3), sp()).unwrap(), Value::Int(-2));
        let err = modulo(&Value::Int(1), &Value::Int(0), sp()).unwrap_err();
        assert_eq!(err.message, "Modulo by zero");
    }

    #[test]
    fn test_text_concatenation() {
        assert_eq!(
            add(&Value::text("n="), &Value::Int(4), sp()).unwrap(),
            Value::text("n=4")
        );
        assert_eq!(
            add(&Value::Bool(true), &Value::text("!"), sp()).unwrap(),
            Value::text("RISEN!")
        );
    }

    #[test]
    fn test_secure_concatenation_stays_secure() {
        let joined = add(&Value::secure("ab"), &Value::text("cd"), sp()).unwrap();
        match joined {
            Value::Secure(s) => assert_eq!(s.reveal(), "abcd"),
            other => panic!("expected secure text, got {:?}", other),
        }
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = add(&Value::Int(i64::MAX), &Value::Int(1), sp()).unwrap_err();
        assert_eq!(err.message, "Integer overflow");
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(rotate_left(1, 33), 2);
        assert_eq!(rotate_left(0x8000_0000, 1), 1);
        assert_eq!(bit_not(&Value::Int(0), sp()).unwrap(), Value::Int(0xFFFF_FFFF));
        assert_eq!(bitwise(BinaryOp::BitXor, &Value::Int(6), &Value::Int(3), sp()).unwrap(), Value::Int(5));
        assert!(bitwise(BinaryOp::BitAnd, &Value::Float(1.0), &Value::Int(1), sp()).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&Value::Void, sp()).unwrap());
        assert!(truthy(&Value::text("x"), sp()).unwrap());
        assert!(!truthy(&Value::array(vec![]), sp()).unwrap());
        let err = truthy(&Value::Float(1.0), sp()).unwrap_err();
        assert_eq!(err.message, "Cannot convert phantom to boolean");
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            compare(BinaryOp::Less, &Value::Int(1), &Value::Float(1.5), sp()).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            compare(BinaryOp::GreaterEqual, &Value::text("b"), &Value::text("a"), sp()).unwrap(),
            Value::Bool(true)
        );
        assert!(compare(BinaryOp::Less, &Value::text("a"), &Value::Int(1), sp()).is_err());
    }

    #[test]
    fn test_shifts() {
        assert_eq!(shift_left(&Value::Int(1), &Value::Int(4), sp()).unwrap(), Value::Int(16));
        assert_eq!(shift_right(&Value::Int(-16), &Value::Int(2), sp()).unwrap(), Value::Int(-4));
        assert!(shift_left(&Value::Int(1), &Value::Int(64), sp()).is_err());
        assert!(shift_right(&Value::Int(1), &Value::Int(-1), sp()).is_err());
    }
}
