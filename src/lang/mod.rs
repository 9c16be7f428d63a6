//! Path Language - binding expression parsing
//!
//! Three shapes of binding text:
//! - field: `Temperature`, `Parent->Parent->Status`
//! - literal: `'red'`, `42`, `true`
//! - script: `Temperature > 80 ? 'red' : 'green'`
//!
//! Parsing is pure and total: every input yields either a typed expression or
//! a parse error, never a panic.

mod ast;
mod lexer;
mod parser;
mod path;

pub use ast::{json_number, BinaryOp, Builtin, Expr, UnaryOp};
pub use lexer::{is_identifier, tokenize, Spanned, Token};
pub use parser::{parse, MAX_NESTING};
pub use path::{parse_path, FieldPath, PathExpr, PATH_SEPARATOR};

use serde_json::Value;

use crate::error::Result;

/// Typed form of a binding expression, with its inferred mode
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedExpression {
    /// A single path, delivered as-is
    Field(PathExpr),
    /// Constant with no dependencies
    Literal(Value),
    /// Anything else
    Script(Expr),
}

impl ParsedExpression {
    pub fn dependencies(&self) -> Vec<PathExpr> {
        match self {
            ParsedExpression::Field(path) => vec![path.clone()],
            ParsedExpression::Literal(_) => Vec::new(),
            ParsedExpression::Script(expr) => expr.dependencies(),
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            ParsedExpression::Field(_) => "field",
            ParsedExpression::Literal(_) => "literal",
            ParsedExpression::Script(_) => "script",
        }
    }

    /// Lift back to an expression tree (field and literal become leaves)
    pub fn into_expr(self) -> Expr {
        match self {
            ParsedExpression::Field(path) => Expr::Path(path),
            ParsedExpression::Literal(value) => Expr::Literal(value),
            ParsedExpression::Script(expr) => expr,
        }
    }
}

/// Parse binding text and infer its mode
pub fn parse_expression(text: &str) -> Result<ParsedExpression> {
    let expr = parse(text)?;
    Ok(match expr {
        Expr::Path(path) => ParsedExpression::Field(path),
        Expr::Literal(value) => ParsedExpression::Literal(value),
        expr => match negated_number(&expr) {
            Some(value) => ParsedExpression::Literal(value),
            None => ParsedExpression::Script(expr),
        },
    })
}

/// `-42` lexes as negation of `42`; fold it so it stays a literal
fn negated_number(expr: &Expr) -> Option<Value> {
    let Expr::Unary {
        op: UnaryOp::Neg,
        operand,
    } = expr
    else {
        return None;
    };
    match operand.as_ref() {
        Expr::Literal(Value::Number(n)) => json_number(-n.as_f64()?),
        _ => None,
    }
}

/// Field dependencies of binding text, in first-appearance order
///
/// # Examples
///
/// ```
/// use livebind::lang::extract_dependencies;
///
/// let deps = extract_dependencies("A > 80 ? 'red' : 'green'").unwrap();
/// assert_eq!(deps.len(), 1);
/// assert_eq!(deps[0].canonical(), "A");
/// ```
pub fn extract_dependencies(text: &str) -> Result<Vec<PathExpr>> {
    Ok(parse_expression(text)?.dependencies())
}
