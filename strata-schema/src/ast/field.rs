//! Field definitions for entities.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityId, FieldType, RelationKind, Unique};
use crate::error::{SchemaError, SchemaResult};

/// Back-reference from a generated field to the relation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationRef {
    /// Kind of the generating relation.
    pub kind: RelationKind,
    /// Entity the relation points at.
    pub target: EntityId,
}

/// One column of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Part of the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Uniqueness flag or unique group.
    #[serde(default)]
    pub unique: Unique,
    /// NOT NULL.
    #[serde(default)]
    pub required: bool,
    /// Whether `default_value` applies.
    #[serde(default)]
    pub default: bool,
    /// Default value when `default` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Database-generated sequence.
    #[serde(default)]
    pub auto_increment: bool,
    /// Visible to readers.
    #[serde(default = "default_visible")]
    pub read: bool,
    /// Writable by clients.
    #[serde(default = "default_visible")]
    pub write: bool,
    /// Set when the field was generated by a relation.
    #[serde(skip)]
    pub is_relation: Option<RelationRef>,
}

fn default_visible() -> bool {
    true
}

impl Field {
    /// Create a plain, optional field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary: false,
            unique: Unique::Flag(false),
            required: false,
            default: false,
            default_value: None,
            auto_increment: false,
            read: true,
            write: true,
            is_relation: None,
        }
    }

    /// Mark as primary key.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = Unique::Flag(true);
        self
    }

    /// Put the field into a named unique group.
    pub fn unique_group(mut self, group: impl Into<String>) -> Self {
        self.unique = Unique::Group(group.into());
        self
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as auto-incrementing.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Set a default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = true;
        self.default_value = Some(value);
        self
    }

    /// Whether the field was generated by a relation.
    pub fn is_derived(&self) -> bool {
        self.is_relation.is_some()
    }

    /// Check the field's own invariants.
    pub fn validate(&self, entity: &str) -> SchemaResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::invalid_field(entity, &self.name, "field name is empty"));
        }
        if self.auto_increment && !self.field_type.supports_auto_increment() {
            return Err(SchemaError::invalid_field(
                entity,
                &self.name,
                format!("autoIncrement requires type number, found {}", self.field_type),
            ));
        }
        if !self.default && self.default_value.is_some() {
            return Err(SchemaError::invalid_field(
                entity,
                &self.name,
                "defaultValue given without default flag",
            ));
        }
        Ok(())
    }
}

/// Parses the `name:type,flag,...` shorthand, e.g.
/// `id:number,primary,unique,autoIncrement,required`.
impl FromStr for Field {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once(':')
            .ok_or_else(|| SchemaError::invalid_field("", s, "expected `name:type[,flags]`"))?;
        let name = name.trim();

        let mut parts = rest.split(',').map(str::trim);
        let type_name = parts.next().unwrap_or_default();
        let field_type = FieldType::from_str(type_name)
            .ok_or_else(|| SchemaError::unknown_type("", name, type_name))?;

        let mut field = Field::new(name, field_type);
        for flag in parts.filter(|p| !p.is_empty()) {
            match flag.split_once('=') {
                Some(("unique", group)) => field.unique = Unique::Group(group.to_string()),
                Some(("default", raw)) => {
                    let value = serde_json::from_str(raw)
                        .unwrap_or_else(|_| Value::String(raw.to_string()));
                    field = field.with_default(value);
                }
                Some(_) => {
                    return Err(SchemaError::invalid_field(
                        "",
                        name,
                        format!("unknown flag `{flag}`"),
                    ));
                }
                None => match flag {
                    "primary" => field.primary = true,
                    "unique" => field.unique = Unique::Flag(true),
                    "required" => field.required = true,
                    "autoIncrement" => field.auto_increment = true,
                    "hidden" => field.read = false,
                    "readonly" => field.write = false,
                    other => {
                        return Err(SchemaError::invalid_field(
                            "",
                            name,
                            format!("unknown flag `{other}`"),
                        ));
                    }
                },
            }
        }

        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_shorthand() {
        let field: Field = "id_test:number,primary,unique,autoIncrement,required"
            .parse()
            .unwrap();

        assert_eq!(
            field,
            Field::new("id_test", FieldType::Number)
                .primary()
                .unique()
                .auto_increment()
                .required()
        );
    }

    #[test]
    fn test_parse_shorthand_group_and_default() {
        let field: Field = "email:text,unique=login,default=\"none\"".parse().unwrap();
        assert_eq!(field.unique, Unique::Group("login".to_string()));
        assert!(field.default);
        assert_eq!(field.default_value, Some(Value::String("none".into())));
    }

    #[test]
    fn test_parse_shorthand_errors() {
        assert!("nocolon".parse::<Field>().is_err());
        assert!("a:blob".parse::<Field>().is_err());
        assert!("a:text,shiny".parse::<Field>().is_err());
    }

    #[test]
    fn test_validate_auto_increment_type() {
        let field = Field::new("code", FieldType::Text).auto_increment();
        assert!(field.validate("item").is_err());

        let field = Field::new("id", FieldType::Number).auto_increment();
        assert!(field.validate("item").is_ok());
    }

    #[test]
    fn test_serde_camel_case() {
        let field = Field::new("id", FieldType::Number).auto_increment();
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["autoIncrement"], Value::Bool(true));
        assert_eq!(json["type"], Value::String("number".into()));
        assert!(json.get("isRelation").is_none());

        let back: Field = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn test_visibility_defaults() {
        let field: Field = serde_json::from_str(r#"{"name":"a","type":"text"}"#).unwrap();
        assert!(field.read);
        assert!(field.write);
        assert_eq!(field.unique, Unique::Flag(false));
    }
}
