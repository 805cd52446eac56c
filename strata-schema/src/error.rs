//! Error types for entity definitions and configuration.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while building or validating entity definitions.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(strata::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid entity definition.
    #[error("invalid entity `{name}`: {message}")]
    #[diagnostic(code(strata::schema::invalid_entity))]
    InvalidEntity { name: String, message: String },

    /// Invalid field definition.
    #[error("invalid field `{entity}.{field}`: {message}")]
    #[diagnostic(code(strata::schema::invalid_field))]
    InvalidField {
        entity: String,
        field: String,
        message: String,
    },

    /// Invalid relation definition.
    #[error("invalid relation `{entity}` -> `{target}`: {message}")]
    #[diagnostic(code(strata::schema::invalid_relation))]
    InvalidRelation {
        entity: String,
        target: String,
        message: String,
    },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(strata::schema::duplicate))]
    Duplicate { kind: String, name: String },

    /// Unknown field type.
    #[error("unknown type `{type_name}` in `{entity}.{field}`")]
    #[diagnostic(
        code(strata::schema::unknown_type),
        help("expected one of: text, number, float, boolean, date")
    )]
    UnknownType {
        entity: String,
        field: String,
        type_name: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    #[diagnostic(code(strata::schema::config_error))]
    ConfigError { message: String },

    /// TOML parsing error.
    #[error("failed to parse TOML")]
    #[diagnostic(code(strata::schema::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },

    /// Validation error with multiple issues.
    #[error("entity validation failed with {count} error(s)")]
    #[diagnostic(code(strata::schema::validation_failed))]
    ValidationFailed {
        count: usize,
        #[related]
        errors: Vec<SchemaError>,
    },
}

impl SchemaError {
    /// Create an invalid entity error.
    pub fn invalid_entity(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEntity {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid field error.
    pub fn invalid_field(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an invalid relation error.
    pub fn invalid_relation(
        entity: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRelation {
            entity: entity.into(),
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an unknown type error.
    pub fn unknown_type(
        entity: impl Into<String>,
        field: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self::UnknownType {
            entity: entity.into(),
            field: field.into(),
            type_name: type_name.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(unused_assignments)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_field_display() {
        let err = SchemaError::invalid_field("user", "code", "bad flag");
        assert_eq!(err.to_string(), "invalid field `user.code`: bad flag");
    }

    #[test]
    fn test_duplicate_display() {
        let err = SchemaError::duplicate("field", "email");
        assert!(err.to_string().contains("duplicate field `email`"));
    }

    #[test]
    fn test_validation_failed_related() {
        let err = SchemaError::ValidationFailed {
            count: 2,
            errors: vec![
                SchemaError::duplicate("field", "a"),
                SchemaError::unknown_type("e", "b", "blob"),
            ],
        };

        assert!(err.to_string().contains("2 error(s)"));
        assert_eq!(err.related().map(|r| r.count()), Some(2));
    }

    #[test]
    fn test_diagnostic_code() {
        let err = SchemaError::config("missing root");
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("strata::schema::config_error"));
    }
}
