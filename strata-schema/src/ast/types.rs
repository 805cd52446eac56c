//! Scalar type definitions shared by fields and database columns.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage type of a field or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free text (maps to TEXT/VARCHAR).
    Text,
    /// Integer number (maps to INTEGER).
    Number,
    /// Floating point number.
    Float,
    /// Boolean flag.
    Boolean,
    /// Date or timestamp.
    Date,
}

impl FieldType {
    /// Parse a field type from its lowercase name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" | "string" => Some(Self::Text),
            "number" | "int" | "integer" => Some(Self::Number),
            "float" | "double" => Some(Self::Float),
            "boolean" | "bool" => Some(Self::Boolean),
            "date" | "datetime" => Some(Self::Date),
            _ => None,
        }
    }

    /// Get the canonical type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }

    /// Whether values of this type can auto-increment.
    pub fn supports_auto_increment(&self) -> bool {
        matches!(self, Self::Number)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniqueness of a field: either a plain flag or membership of a named
/// multi-column unique group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Unique {
    /// Single-column uniqueness.
    Flag(bool),
    /// Member of the named unique group.
    Group(String),
}

impl Default for Unique {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl Unique {
    /// Whether the field takes part in any unique constraint.
    pub fn is_unique(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Group(_) => true,
        }
    }

    /// The unique group name, if any.
    pub fn group(&self) -> Option<&str> {
        match self {
            Self::Flag(_) => None,
            Self::Group(name) => Some(name),
        }
    }
}

impl From<bool> for Unique {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

/// Referential action for foreign key constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferentialAction {
    /// Cascade the operation.
    Cascade,
    /// Restrict the operation (error if references exist).
    Restrict,
    /// No action (deferred check).
    NoAction,
    /// Set to null.
    SetNull,
    /// Set to default value.
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL spelling of the action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_from_str() {
        assert_eq!(FieldType::from_str("number"), Some(FieldType::Number));
        assert_eq!(FieldType::from_str("bool"), Some(FieldType::Boolean));
        assert_eq!(FieldType::from_str("blob"), None);
    }

    #[test]
    fn test_field_type_serde() {
        let json = serde_json::to_string(&FieldType::Float).unwrap();
        assert_eq!(json, "\"float\"");
    }

    #[test]
    fn test_auto_increment_support() {
        assert!(FieldType::Number.supports_auto_increment());
        assert!(!FieldType::Text.supports_auto_increment());
    }

    #[test]
    fn test_unique_untagged() {
        let flag: Unique = serde_json::from_str("true").unwrap();
        assert_eq!(flag, Unique::Flag(true));

        let group: Unique = serde_json::from_str("\"email_tenant\"").unwrap();
        assert_eq!(group.group(), Some("email_tenant"));
        assert!(group.is_unique());
        assert!(!Unique::default().is_unique());
    }

    #[test]
    fn test_referential_action() {
        let action: ReferentialAction = serde_json::from_str("\"setNull\"").unwrap();
        assert_eq!(action.as_sql(), "SET NULL");
    }
}
