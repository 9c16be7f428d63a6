//! Script expression tree
//!
//! Only data: literals, paths, operators, conditionals and calls into the
//! fixed builtin set. Nothing in the tree can name a runtime object.

use std::fmt;

use rustc_hash::FxHashSet;
use serde_json::Value;

use super::path::PathExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logic
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        }
    }
}

/// The allow-listed pure helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Abs,
    Ceil,
    Floor,
    Round,
    Sqrt,
    Pow,
    Min,
    Max,
    Clamp,
    Len,
    Upper,
    Lower,
    Trim,
    Concat,
    Str,
    Num,
    Fixed,
    Coalesce,
}

impl Builtin {
    pub const ALL: [Builtin; 18] = [
        Builtin::Abs,
        Builtin::Ceil,
        Builtin::Floor,
        Builtin::Round,
        Builtin::Sqrt,
        Builtin::Pow,
        Builtin::Min,
        Builtin::Max,
        Builtin::Clamp,
        Builtin::Len,
        Builtin::Upper,
        Builtin::Lower,
        Builtin::Trim,
        Builtin::Concat,
        Builtin::Str,
        Builtin::Num,
        Builtin::Fixed,
        Builtin::Coalesce,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::Ceil => "ceil",
            Builtin::Floor => "floor",
            Builtin::Round => "round",
            Builtin::Sqrt => "sqrt",
            Builtin::Pow => "pow",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Clamp => "clamp",
            Builtin::Len => "len",
            Builtin::Upper => "upper",
            Builtin::Lower => "lower",
            Builtin::Trim => "trim",
            Builtin::Concat => "concat",
            Builtin::Str => "str",
            Builtin::Num => "num",
            Builtin::Fixed => "fixed",
            Builtin::Coalesce => "coalesce",
        }
    }

    /// Accepted argument count as (min, max); `None` max means variadic
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Builtin::Abs
            | Builtin::Ceil
            | Builtin::Floor
            | Builtin::Sqrt
            | Builtin::Len
            | Builtin::Upper
            | Builtin::Lower
            | Builtin::Trim
            | Builtin::Str
            | Builtin::Num => (1, Some(1)),
            Builtin::Round | Builtin::Fixed => (1, Some(2)),
            Builtin::Pow => (2, Some(2)),
            Builtin::Clamp => (3, Some(3)),
            Builtin::Min | Builtin::Max => (1, None),
            Builtin::Concat | Builtin::Coalesce => (0, None),
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(PathExpr),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Call {
        function: Builtin,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Distinct paths referenced by the expression, in first-appearance order
    pub fn dependencies(&self) -> Vec<PathExpr> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        self.collect_paths(&mut seen, &mut out);
        out
    }

    fn collect_paths(&self, seen: &mut FxHashSet<PathExpr>, out: &mut Vec<PathExpr>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Path(path) => {
                if seen.insert(path.clone()) {
                    out.push(path.clone());
                }
            }
            Expr::Unary { operand, .. } => operand.collect_paths(seen, out),
            Expr::Binary { left, right, .. } => {
                left.collect_paths(seen, out);
                right.collect_paths(seen, out);
            }
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_paths(seen, out);
                then_branch.collect_paths(seen, out);
                else_branch.collect_paths(seen, out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_paths(seen, out);
                }
            }
        }
    }
}

/// JSON number for an f64: integral values become integers, non-finite is `None`
pub fn json_number(n: f64) -> Option<Value> {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return Some(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}
