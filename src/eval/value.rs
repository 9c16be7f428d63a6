//! Value semantics for script evaluation
//!
//! Scripts operate on plain JSON values. `null` is the unresolved sentinel
//! inside a script and propagates through arithmetic.

use std::cmp::Ordering;

use serde_json::Value;

use crate::lang::{json_number, BinaryOp};

/// Failure reason; the interpreter attaches the expression text
pub(crate) type OpResult = std::result::Result<Value, String>;

/// `null`, `false`, `0` and `""` are falsy; everything else is truthy
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form used by concatenation and string helpers
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Equality with numeric normalization (`1 == 1.0`)
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Ordering is only defined between two numbers or two strings
fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Comparison operators; mismatched types compare `false`
pub fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::Eq => loose_eq(left, right),
        BinaryOp::Ne => !loose_eq(left, right),
        BinaryOp::Lt => ordering(left, right) == Some(Ordering::Less),
        BinaryOp::Le => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => ordering(left, right) == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(
            ordering(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        _ => false,
    }
}

pub(crate) fn number_result(n: f64) -> OpResult {
    json_number(n).ok_or_else(|| "result is not a finite number".to_string())
}

/// `+ - * / %`
pub(crate) fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> OpResult {
    if op == BinaryOp::Add && (left.is_string() || right.is_string()) {
        return Ok(Value::String(display(left) + &display(right)));
    }
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(format!(
            "cannot apply '{}' to {} and {}",
            op.symbol(),
            type_name(left),
            type_name(right)
        ));
    };

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Err(format!("'{}' by zero", op.symbol()));
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        other => return Err(format!("'{}' is not arithmetic", other.symbol())),
    };
    number_result(result)
}

/// Unary minus; `null` stays `null`
pub(crate) fn negate(value: &Value) -> OpResult {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| "invalid number".to_string())
            .and_then(|n| number_result(-n)),
        other => Err(format!("cannot negate a {}", type_name(other))),
    }
}
