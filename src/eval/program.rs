//! Compiled binding: primary stage plus optional transform stage
//!
//! ```text
//! dependency values ─▶ primary (field | literal | script) ─▶ transform(value) ─▶ output
//! ```
//!
//! The transform sees the primary output under the reserved name `value` and
//! may read other paths, which join the binding's dependency set. An
//! unresolved primary output skips the transform.

use serde_json::Value;

use crate::binding::{BindingMode, BindingSpec};
use crate::error::Result;
use crate::lang::{parse, parse_expression, parse_path, Expr, ParsedExpression, PathExpr};

use super::interpreter::{eval_script, Scope};
use super::{BoundValue, DependencyValues};

/// Name the transform stage uses for the primary output
pub const TRANSFORM_INPUT: &str = "value";

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Field(PathExpr),
    Literal(Value),
    Script { expr: Expr, source: String },
}

#[derive(Debug, Clone, PartialEq)]
struct Transform {
    expr: Expr,
    source: String,
}

/// A binding's expressions, parsed once at activation
#[derive(Debug, Clone, PartialEq)]
pub struct BindingProgram {
    mode: BindingMode,
    primary: Stage,
    transform: Option<Transform>,
    dependencies: Vec<PathExpr>,
}

impl BindingProgram {
    /// Parse the expression (and transform) according to the declared mode
    ///
    /// - `field`: must be a bare path
    /// - `literal`: a parsed constant, or the raw text as a string
    /// - `script`: any expression
    pub fn compile(spec: &BindingSpec) -> Result<Self> {
        spec.validate()?;

        let primary = match spec.mode {
            BindingMode::Field => Stage::Field(parse_path(&spec.expression)?),
            BindingMode::Literal => Stage::Literal(literal_value(&spec.expression)),
            BindingMode::Script => Stage::Script {
                expr: parse(&spec.expression)?,
                source: spec.expression.clone(),
            },
        };

        let transform = spec
            .transform_text()
            .map(|text| {
                parse(text).map(|expr| Transform {
                    expr,
                    source: text.to_string(),
                })
            })
            .transpose()?;

        let mut dependencies = match &primary {
            Stage::Field(path) => vec![path.clone()],
            Stage::Literal(_) => Vec::new(),
            Stage::Script { expr, .. } => expr.dependencies(),
        };
        if let Some(transform) = &transform {
            for path in transform.expr.dependencies() {
                if !is_transform_input(&path) && !dependencies.contains(&path) {
                    dependencies.push(path);
                }
            }
        }

        Ok(Self {
            mode: spec.mode,
            primary,
            transform,
            dependencies,
        })
    }

    pub fn mode(&self) -> BindingMode {
        self.mode
    }

    /// Distinct paths this binding reads, in first-appearance order
    pub fn dependencies(&self) -> &[PathExpr] {
        &self.dependencies
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    /// Compute the output from the current dependency snapshot
    pub fn evaluate(&self, values: &DependencyValues) -> Result<BoundValue> {
        let primary = match &self.primary {
            Stage::Field(path) => values.get(path),
            Stage::Literal(value) => BoundValue::Value(value.clone()),
            Stage::Script { expr, source } => {
                BoundValue::Value(eval_script(expr, &ScriptScope { values }, source)?)
            }
        };

        let (Some(transform), BoundValue::Value(input)) = (&self.transform, &primary) else {
            return Ok(primary);
        };
        let scope = TransformScope { values, input };
        eval_script(&transform.expr, &scope, &transform.source).map(BoundValue::Value)
    }
}

fn is_transform_input(path: &PathExpr) -> bool {
    path.is_direct() && path.field().as_str() == TRANSFORM_INPUT
}

/// Literal mode accepts a quoted/number/boolean literal or plain text
fn literal_value(text: &str) -> Value {
    match parse_expression(text) {
        Ok(ParsedExpression::Literal(value)) => value,
        _ => Value::String(text.to_string()),
    }
}

struct ScriptScope<'a> {
    values: &'a DependencyValues,
}

impl Scope for ScriptScope<'_> {
    fn lookup(&self, path: &PathExpr) -> Value {
        self.values.get(path).into_script_value()
    }
}

struct TransformScope<'a> {
    values: &'a DependencyValues,
    input: &'a Value,
}

impl Scope for TransformScope<'_> {
    fn lookup(&self, path: &PathExpr) -> Value {
        if is_transform_input(path) {
            return self.input.clone();
        }
        self.values.get(path).into_script_value()
    }
}

/// One-shot evaluation of binding text
///
/// # Examples
///
/// ```
/// use livebind::binding::BindingMode;
/// use livebind::eval::{evaluate, BoundValue, DependencyValues};
/// use serde_json::json;
///
/// let mut values = DependencyValues::new();
/// values.set("Temperature", json!(85));
/// let out = evaluate(BindingMode::Script, "Temperature > 80 ? 'red' : 'green'", &values).unwrap();
/// assert_eq!(out, BoundValue::Value(json!("red")));
/// ```
pub fn evaluate(mode: BindingMode, text: &str, values: &DependencyValues) -> Result<BoundValue> {
    let spec = BindingSpec::new("adhoc", "value", text, mode);
    BindingProgram::compile(&spec)?.evaluate(values)
}
