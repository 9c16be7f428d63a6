//! Allow-listed pure helpers callable from scripts
//!
//! Every helper is total over `null` (returns `null` or a neutral value) so a
//! missing dependency never turns into an evaluation error by itself.

use serde_json::Value;

use crate::lang::Builtin;

use super::value::{display, number_result, type_name, OpResult};

const MAX_DIGITS: i32 = 15;

pub(crate) fn call(function: Builtin, args: &[Value]) -> OpResult {
    match function {
        Builtin::Abs => unary_math(function, args, f64::abs),
        Builtin::Ceil => unary_math(function, args, f64::ceil),
        Builtin::Floor => unary_math(function, args, f64::floor),
        Builtin::Sqrt => unary_math(function, args, f64::sqrt),
        Builtin::Round => {
            let digits = digits_arg(function, args.get(1))?;
            let factor = 10f64.powi(digits);
            unary_math(function, args, |x| (x * factor).round() / factor)
        }
        Builtin::Pow => match (arg(args, 0), arg(args, 1)) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (base, exp) => number_result(number(function, base)?.powf(number(function, exp)?)),
        },
        Builtin::Min => fold_numbers(function, args, f64::min),
        Builtin::Max => fold_numbers(function, args, f64::max),
        Builtin::Clamp => {
            let x = arg(args, 0);
            if x.is_null() {
                return Ok(Value::Null);
            }
            let (x, lo, hi) = (
                number(function, x)?,
                number(function, arg(args, 1))?,
                number(function, arg(args, 2))?,
            );
            if lo > hi {
                return Err(format!("clamp() bounds are reversed ({} > {})", lo, hi));
            }
            number_result(x.clamp(lo, hi))
        }
        Builtin::Len => match arg(args, 0) {
            Value::Null => Ok(Value::from(0)),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(format!("len() of a {}", type_name(other))),
        },
        Builtin::Upper => text_map(args, |s| s.to_uppercase()),
        Builtin::Lower => text_map(args, |s| s.to_lowercase()),
        Builtin::Trim => text_map(args, |s| s.trim().to_string()),
        Builtin::Concat => Ok(Value::String(args.iter().map(display).collect())),
        Builtin::Str => Ok(Value::String(display(arg(args, 0)))),
        Builtin::Num => Ok(match arg(args, 0) {
            Value::Number(n) => Value::Number(n.clone()),
            Value::Bool(b) => Value::from(u8::from(*b)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(crate::lang::json_number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        Builtin::Fixed => {
            let digits = digits_arg(function, args.get(1))?;
            match arg(args, 0) {
                Value::Null => Ok(Value::Null),
                x => {
                    let x = number(function, x)?;
                    Ok(Value::String(format!("{:.*}", digits as usize, x)))
                }
            }
        }
        Builtin::Coalesce => Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
    }
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

fn number(function: Builtin, value: &Value) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{}() expects a number, got {}", function, type_name(value)))
}

fn digits_arg(function: Builtin, value: Option<&Value>) -> Result<i32, String> {
    let Some(value) = value else {
        return Ok(0);
    };
    match value.as_i64() {
        Some(d) if (0..=MAX_DIGITS as i64).contains(&d) => Ok(d as i32),
        _ => Err(format!(
            "{}() digits must be an integer between 0 and {}",
            function, MAX_DIGITS
        )),
    }
}

fn unary_math(function: Builtin, args: &[Value], op: impl Fn(f64) -> f64) -> OpResult {
    match arg(args, 0) {
        Value::Null => Ok(Value::Null),
        x => number_result(op(number(function, x)?)),
    }
}

/// min/max over the non-null arguments; all null gives null
fn fold_numbers(function: Builtin, args: &[Value], op: fn(f64, f64) -> f64) -> OpResult {
    let mut acc: Option<f64> = None;
    for value in args.iter().filter(|v| !v.is_null()) {
        let n = number(function, value)?;
        acc = Some(acc.map_or(n, |a| op(a, n)));
    }
    match acc {
        Some(n) => number_result(n),
        None => Ok(Value::Null),
    }
}

fn text_map(args: &[Value], op: impl Fn(&str) -> String) -> OpResult {
    match arg(args, 0) {
        Value::Null => Ok(Value::Null),
        other => Ok(Value::String(op(&display(other)))),
    }
}
