//! Tree-walking evaluation of script expressions

use serde_json::Value;

use crate::error::{BindError, Result};
use crate::lang::{BinaryOp, Expr, PathExpr, UnaryOp};

use super::builtins;
use super::value::{arithmetic, compare, negate, truthy, OpResult};

/// Name lookup for a script; unknown and unresolved paths read as `null`
pub trait Scope {
    fn lookup(&self, path: &PathExpr) -> Value;
}

/// Evaluate `expr`, attaching `source` to any failure
pub fn eval_script(expr: &Expr, scope: &dyn Scope, source: &str) -> Result<Value> {
    eval(expr, scope).map_err(|reason| BindError::Evaluation {
        expression: source.to_string(),
        reason,
    })
}

fn eval(expr: &Expr, scope: &dyn Scope) -> OpResult {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => Ok(scope.lookup(path)),
        Expr::Unary { op, operand } => {
            let value = eval(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => negate(&value),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, scope)?;
            match op {
                BinaryOp::And => {
                    Ok(Value::Bool(truthy(&left) && truthy(&eval(right, scope)?)))
                }
                BinaryOp::Or => Ok(Value::Bool(truthy(&left) || truthy(&eval(right, scope)?))),
                BinaryOp::Coalesce if left.is_null() => eval(right, scope),
                BinaryOp::Coalesce => Ok(left),
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge => Ok(Value::Bool(compare(*op, &left, &eval(right, scope)?))),
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                    arithmetic(*op, &left, &eval(right, scope)?)
                }
            }
        }
        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            if truthy(&eval(condition, scope)?) {
                eval(then_branch, scope)
            } else {
                eval(else_branch, scope)
            }
        }
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<std::result::Result<Vec<_>, String>>()?;
            builtins::call(*function, &args)
        }
    }
}
