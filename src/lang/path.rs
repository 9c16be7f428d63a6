//! Field paths: `Temperature`, `Parent->Status`, `Parent->Parent->Status`
//!
//! A [`PathExpr`] is the unrooted form that appears in expression text.
//! Rooting it at an entity gives a [`FieldPath`], the unit of resolution and
//! deduplication.

use std::fmt;

use crate::error::{BindError, Result};
use crate::store::{EntityId, FieldId};

use super::lexer::is_identifier;

pub const PATH_SEPARATOR: &str = "->";

/// Relation hops followed by the final field name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExpr {
    relations: Vec<FieldId>,
    field: FieldId,
}

impl PathExpr {
    /// Direct field reference (no hops)
    pub fn field_only(field: impl Into<FieldId>) -> Self {
        Self {
            relations: Vec::new(),
            field: field.into(),
        }
    }

    /// Build from segments; `None` when `segments` is empty
    pub fn from_segments<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<FieldId>,
    {
        let mut relations: Vec<FieldId> = segments.into_iter().map(Into::into).collect();
        let field = relations.pop()?;
        Some(Self { relations, field })
    }

    /// Relation names walked before the final field
    pub fn relations(&self) -> &[FieldId] {
        &self.relations
    }

    pub fn field(&self) -> &FieldId {
        &self.field
    }

    /// Number of relation hops (0 for a direct field)
    pub fn hop_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_direct(&self) -> bool {
        self.relations.is_empty()
    }

    /// Canonical text: segments joined by `->` without whitespace
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    pub fn rooted_at(&self, root: impl Into<EntityId>) -> FieldPath {
        FieldPath {
            root: root.into(),
            path: self.clone(),
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for relation in &self.relations {
            write!(f, "{}{}", relation, PATH_SEPARATOR)?;
        }
        write!(f, "{}", self.field)
    }
}

/// A path rooted at an entity
///
/// Two FieldPaths are equivalent iff they share the root and the exact hop
/// sequence; the derived `Eq`/`Hash` encode exactly that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub root: EntityId,
    pub path: PathExpr,
}

impl FieldPath {
    pub fn hop_count(&self) -> usize {
        self.path.hop_count()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.root, self.path)
    }
}

/// Parse a bare path: segments split on `->`, trimmed, each an identifier
///
/// # Examples
///
/// ```
/// use livebind::lang::parse_path;
///
/// let path = parse_path("Parent -> Status").unwrap();
/// assert_eq!(path.canonical(), "Parent->Status");
/// assert!(parse_path("Parent->").is_err());
/// ```
pub fn parse_path(text: &str) -> Result<PathExpr> {
    let mut segments = Vec::new();
    let mut offset = 0;

    for raw in text.split(PATH_SEPARATOR) {
        let segment = raw.trim();
        let position = offset + (raw.len() - raw.trim_start().len());

        if segment.is_empty() {
            return Err(BindError::InvalidPathSyntax {
                expression: text.to_string(),
                position,
                details: "empty path segment".to_string(),
            });
        }
        if !is_identifier(segment) {
            return Err(BindError::InvalidPathSyntax {
                expression: text.to_string(),
                position,
                details: format!("'{}' is not a valid field name", segment),
            });
        }

        segments.push(FieldId::new(segment));
        offset += raw.len() + PATH_SEPARATOR.len();
    }

    PathExpr::from_segments(segments).ok_or_else(|| BindError::InvalidPathSyntax {
        expression: text.to_string(),
        position: 0,
        details: "empty path".to_string(),
    })
}
