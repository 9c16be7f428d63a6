//! Persisted binding shapes
//!
//! One binding, as stored with the faceplate:
//! ```yaml
//! componentId: gauge-1
//! property: fill
//! expression: "Temperature > 80 ? 'red' : 'green'"
//! mode: script
//! transform: "upper(value)"        # optional
//! description: Alarm color         # optional
//! ```
//!
//! A [`BindingSet`] groups bindings with an optional root entity, a store
//! snapshot and a write script; the CLI consumes it.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BindError, Result};
use crate::store::StoreSnapshot;

/// How the expression text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingMode {
    /// A single path, delivered unchanged
    Field,
    /// A constant
    Literal,
    /// An expression over any number of paths
    Script,
}

impl BindingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BindingMode::Field => "field",
            BindingMode::Literal => "literal",
            BindingMode::Script => "script",
        }
    }
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindingMode {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "field" => Ok(BindingMode::Field),
            "literal" => Ok(BindingMode::Literal),
            "script" => Ok(BindingMode::Script),
            other => Err(BindError::InvalidBinding {
                binding: s.to_string(),
                reason: format!("unknown mode '{}' (expected field, literal or script)", other),
            }),
        }
    }
}

/// Immutable description of one binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    pub component_id: String,
    pub property: String,
    pub expression: String,
    pub mode: BindingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BindingSpec {
    pub fn new(
        component_id: impl Into<String>,
        property: impl Into<String>,
        expression: impl Into<String>,
        mode: BindingMode,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            property: property.into(),
            expression: expression.into(),
            mode,
            transform: None,
            description: None,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `component.property`, used in logs and events
    pub fn key(&self) -> String {
        format!("{}.{}", self.component_id, self.property)
    }

    /// Transform text, if present and not blank
    pub fn transform_text(&self) -> Option<&str> {
        self.transform
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Structural checks that do not involve parsing the expression
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| BindError::InvalidBinding {
            binding: self.key(),
            reason: reason.to_string(),
        };

        if self.component_id.trim().is_empty() {
            return Err(invalid("componentId cannot be empty"));
        }
        if self.property.trim().is_empty() {
            return Err(invalid("property cannot be empty"));
        }
        if self.mode != BindingMode::Literal && self.expression.trim().is_empty() {
            return Err(invalid("expression cannot be empty"));
        }
        Ok(())
    }
}

/// One scripted store write, replayed by `livebind run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedWrite {
    pub entity: String,
    pub field: String,
    pub value: Value,
}

/// A file of bindings plus optional scenario data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSet {
    /// Entity every binding is rooted at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub bindings: Vec<BindingSpec>,
    /// Initial store content (entity → field → value)
    #[serde(default, skip_serializing_if = "StoreSnapshot::is_empty")]
    pub store: StoreSnapshot,
    /// Writes applied in order after activation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writes: Vec<ScriptedWrite>,
}

impl BindingSet {
    /// Parse YAML (or JSON, which YAML accepts)
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn persisted_form_is_accepted_verbatim() {
        let wire = json!({
            "componentId": "gauge-1",
            "property": "fill",
            "expression": "Temperature > 80 ? 'red' : 'green'",
            "mode": "script",
            "transform": "upper(value)"
        });
        let spec: BindingSpec = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(spec.mode, BindingMode::Script);
        assert_eq!(spec.transform_text(), Some("upper(value)"));
        assert_eq!(serde_json::to_value(&spec).unwrap(), wire);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let wire = json!({
            "componentId": "c",
            "property": "p",
            "expression": "A",
            "mode": "formula"
        });
        assert!(serde_json::from_value::<BindingSpec>(wire).is_err());
        assert!("formula".parse::<BindingMode>().is_err());
        assert_eq!("Script".parse::<BindingMode>().unwrap(), BindingMode::Script);
    }

    #[test]
    fn blank_transform_is_ignored() {
        let spec = BindingSpec::new("c", "p", "A", BindingMode::Field).with_transform("   ");
        assert_eq!(spec.transform_text(), None);
    }

    #[test]
    fn validate_rejects_missing_identity() {
        let spec = BindingSpec::new("", "fill", "A", BindingMode::Field);
        assert_eq!(spec.validate().unwrap_err().code(), "LB-014");

        let spec = BindingSpec::new("c", "fill", "  ", BindingMode::Script);
        assert!(spec.validate().is_err());

        let spec = BindingSpec::new("c", "label", "", BindingMode::Literal);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn binding_set_from_yaml() {
        let set = BindingSet::from_yaml_str(
            r#"
root: E1
bindings:
  - componentId: label-1
    property: text
    expression: Parent->Status
    mode: field
store:
  E1:
    Parent: E2
  E2:
    Status: Online
writes:
  - entity: E2
    field: Status
    value: Offline
"#,
        )
        .unwrap();

        assert_eq!(set.root.as_deref(), Some("E1"));
        assert_eq!(set.bindings.len(), 1);
        assert_eq!(set.bindings[0].key(), "label-1.text");
        assert_eq!(set.store["E2"]["Status"], json!("Online"));
        assert_eq!(set.writes[0].value, json!("Offline"));
    }
}
