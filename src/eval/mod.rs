//! Expression Evaluator - pure computation of binding outputs
//!
//! No I/O and no access to runtime state: a [`BindingProgram`] maps a
//! [`DependencyValues`] snapshot to a [`BoundValue`] or an `Evaluation` error.
//!
//! Submodules:
//! - `value`: truthiness, comparison and arithmetic over JSON values
//! - `builtins`: the allow-listed helper functions
//! - `interpreter`: expression tree walker
//! - `program`: compiled binding with primary and transform stages

mod builtins;
mod interpreter;
mod program;
mod value;

pub use interpreter::{eval_script, Scope};
pub use program::{evaluate, BindingProgram, TRANSFORM_INPUT};
pub use value::{display, loose_eq, truthy};

use std::fmt;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;

use crate::lang::PathExpr;

/// Output of a binding: a value, or the unresolved sentinel
///
/// Serializes as the value itself, with `Unresolved` as `null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum BoundValue {
    #[default]
    Unresolved,
    Value(Value),
}

impl BoundValue {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, BoundValue::Unresolved)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            BoundValue::Unresolved => None,
            BoundValue::Value(value) => Some(value),
        }
    }

    /// Scripts see the sentinel as `null`
    pub fn into_script_value(self) -> Value {
        match self {
            BoundValue::Unresolved => Value::Null,
            BoundValue::Value(value) => value,
        }
    }
}

impl From<Value> for BoundValue {
    fn from(value: Value) -> Self {
        BoundValue::Value(value)
    }
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundValue::Unresolved => f.write_str("<unresolved>"),
            BoundValue::Value(value) => write!(f, "{}", value),
        }
    }
}

/// Snapshot of dependency values keyed by canonical path text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyValues {
    values: FxHashMap<String, BoundValue>,
}

impl DependencyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &PathExpr, value: BoundValue) {
        self.values.insert(path.canonical(), value);
    }

    /// Set a resolved value by canonical path text (`"Parent->Status"`)
    pub fn set(&mut self, path: impl Into<String>, value: Value) {
        self.values.insert(path.into(), BoundValue::Value(value));
    }

    /// Current value of `path`; absent paths are unresolved
    pub fn get(&self, path: &PathExpr) -> BoundValue {
        self.values
            .get(&path.canonical())
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
