//! Error types with error codes and fix suggestions
//!
//! Error code ranges:
//! - LB-010-019: Expression / path / binding syntax errors (parse time)
//! - LB-020-029: Resolution errors
//! - LB-030-039: Evaluation errors
//! - LB-040-049: Store / registry errors
//! - LB-050-059: Configuration errors
//! - LB-090-099: IO / serialization errors
//!
//! Only parse-time errors ever reach the caller of `activate`. Everything the
//! runtime hits after activation is logged and absorbed.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BindError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum BindError {
    // ═══════════════════════════════════════════
    // SYNTAX ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[LB-010] Invalid path syntax in '{expression}' at {position}: {details}")]
    InvalidPathSyntax {
        expression: String,
        position: usize,
        details: String,
    },

    #[error("[LB-011] Invalid expression '{expression}' at {position}: {details}")]
    InvalidExpression {
        expression: String,
        position: usize,
        details: String,
    },

    #[error("[LB-012] Unknown function '{name}' (not in the allowed helper list)")]
    UnknownFunction { name: String },

    #[error("[LB-013] Path '{path}' has {hops} hops, more than the limit of {max}")]
    PathTooDeep { path: String, hops: usize, max: usize },

    #[error("[LB-014] Invalid binding '{binding}': {reason}")]
    InvalidBinding { binding: String, reason: String },

    // ═══════════════════════════════════════════
    // RESOLUTION (020-029)
    // ═══════════════════════════════════════════
    #[error("[LB-020] Path '{path}' is unresolved: relation at hop {hop} is empty")]
    UnresolvedPath { path: String, hop: usize },

    // ═══════════════════════════════════════════
    // EVALUATION (030-039)
    // ═══════════════════════════════════════════
    #[error("[LB-030] Evaluation of '{expression}' failed: {reason}")]
    Evaluation { expression: String, reason: String },

    // ═══════════════════════════════════════════
    // STORE / REGISTRY (040-049)
    // ═══════════════════════════════════════════
    #[error("[LB-040] Store unavailable for {entity}.{field}: {reason}")]
    StoreUnavailable {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("[LB-041] Subscription registry has been shut down")]
    RegistryShutDown,

    #[error("[LB-042] No async runtime available: {reason}")]
    NoRuntime { reason: String },

    // ═══════════════════════════════════════════
    // CONFIG (050-059)
    // ═══════════════════════════════════════════
    #[error("[LB-050] Configuration error: {reason}")]
    ConfigError { reason: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION (090-099)
    // ═══════════════════════════════════════════
    #[error("[LB-093] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[LB-094] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[LB-095] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl BindError {
    /// Get the error code (e.g., "LB-010")
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPathSyntax { .. } => "LB-010",
            Self::InvalidExpression { .. } => "LB-011",
            Self::UnknownFunction { .. } => "LB-012",
            Self::PathTooDeep { .. } => "LB-013",
            Self::InvalidBinding { .. } => "LB-014",
            Self::UnresolvedPath { .. } => "LB-020",
            Self::Evaluation { .. } => "LB-030",
            Self::StoreUnavailable { .. } => "LB-040",
            Self::RegistryShutDown => "LB-041",
            Self::NoRuntime { .. } => "LB-042",
            Self::ConfigError { .. } => "LB-050",
            Self::IoError(_) => "LB-093",
            Self::JsonError(_) => "LB-094",
            Self::YamlParse(_) => "LB-095",
        }
    }

    /// Check if error is recoverable (the store adapter may retry it)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Parse-time errors keep a binding from ever activating
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPathSyntax { .. }
                | Self::InvalidExpression { .. }
                | Self::UnknownFunction { .. }
                | Self::PathTooDeep { .. }
                | Self::InvalidBinding { .. }
        )
    }

    pub(crate) fn store_unavailable(
        entity: impl std::fmt::Display,
        field: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::StoreUnavailable {
            entity: entity.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl FixSuggestion for BindError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            BindError::InvalidPathSyntax { .. } => {
                Some("Paths are identifiers joined by '->', e.g. Parent->Status (no empty segments)")
            }
            BindError::InvalidExpression { .. } => {
                Some("Check operators, parentheses and quoting in the script expression")
            }
            BindError::UnknownFunction { .. } => Some(
                "Use one of: abs, ceil, floor, round, sqrt, pow, min, max, clamp, len, upper, lower, trim, concat, str, num, fixed, coalesce",
            ),
            BindError::PathTooDeep { .. } => {
                Some("Shorten the path or raise max_hops in config.toml")
            }
            BindError::InvalidBinding { .. } => {
                Some("Every binding needs a componentId, a property name and an expression")
            }
            BindError::UnresolvedPath { .. } => {
                Some("Set the relation on the intermediate entity; the binding rebinds automatically")
            }
            BindError::Evaluation { .. } => {
                Some("Check operand types; the previous value is kept until evaluation succeeds")
            }
            BindError::StoreUnavailable { .. } => {
                Some("Check the store connection; wrap the adapter in RetryingStore for backoff")
            }
            BindError::RegistryShutDown => Some("Initialize a new BindingEngine for this session"),
            BindError::NoRuntime { .. } => {
                Some("Call BindingEngine::init from inside a tokio runtime")
            }
            BindError::ConfigError { .. } => Some("Check ~/.config/livebind/config.toml syntax"),
            BindError::IoError(_) => Some("Check the file path exists and is readable"),
            BindError::JsonError(_) => Some("Check JSON syntax"),
            BindError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_prefixed() {
        let err = BindError::InvalidPathSyntax {
            expression: "Parent->".into(),
            position: 8,
            details: "empty segment".into(),
        };
        assert_eq!(err.code(), "LB-010");
        assert!(err.to_string().contains("[LB-010]"));
        assert!(err.to_string().contains("Parent->"));
    }

    #[test]
    fn only_store_errors_are_recoverable() {
        assert!(BindError::store_unavailable("E1", "Status", "down").is_recoverable());
        assert!(!BindError::RegistryShutDown.is_recoverable());
        assert!(!BindError::UnknownFunction { name: "exec".into() }.is_recoverable());
    }

    #[test]
    fn parse_errors_are_classified() {
        assert!(BindError::UnknownFunction { name: "eval".into() }.is_parse_error());
        assert!(!BindError::Evaluation {
            expression: "1/0".into(),
            reason: "division by zero".into()
        }
        .is_parse_error());
    }

    #[test]
    fn every_variant_has_a_suggestion() {
        let errors = [
            BindError::RegistryShutDown,
            BindError::ConfigError { reason: "x".into() },
            BindError::PathTooDeep {
                path: "A->B".into(),
                hops: 2,
                max: 1,
            },
        ];
        for err in &errors {
            assert!(err.fix_suggestion().is_some(), "{}", err.code());
        }
    }
}
