//! Integration tests for entity definitions and validation.
//!
//! These tests verify that the field shorthand, entity files and validation
//! rules agree with what the project accepts.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use strata::migrate::{MemoryDriver, MemoryStore, MigrationError, Project};
use strata::schema::{
    EntityDefinition, Field, FieldType, QueryKind, RelationDefinition, RelationKind, SchemaError,
    StrataConfig, Unique, validate_definition,
};

fn project() -> Project {
    Project::new(
        StrataConfig::default(),
        Arc::new(MemoryDriver::new()),
        Arc::new(MemoryStore::new()),
    )
}

fn id() -> Field {
    "id:number,primary,unique,autoIncrement,required".parse().unwrap()
}

/// Test the `name:type,flags` shorthand with every flag
#[test]
fn test_parse_field_shorthand() {
    let field: Field = "id:number,primary,unique,autoIncrement,required"
        .parse()
        .expect("Failed to parse field");
    assert_eq!(field.field_type, FieldType::Number);
    assert!(field.primary && field.required && field.auto_increment);
    assert!(field.unique.is_unique());

    let field: Field = "email:text,unique=email_tenant,hidden,readonly".parse().unwrap();
    assert_eq!(field.unique, Unique::Group("email_tenant".to_string()));
    assert!(!field.read);
    assert!(!field.write);

    let field: Field = "active:bool,default=true".parse().unwrap();
    assert_eq!(field.field_type, FieldType::Boolean);
    assert!(field.default);
    assert_eq!(field.default_value, Some(json!(true)));

    let field: Field = "status:text,default=draft".parse().unwrap();
    assert_eq!(field.default_value, Some(json!("draft")));
}

/// Test malformed shorthand
#[test]
fn test_parse_field_errors() {
    assert!("no_type".parse::<Field>().is_err());
    assert!(matches!(
        "blob:binary".parse::<Field>(),
        Err(SchemaError::UnknownType { .. })
    ));
    assert!(matches!(
        "id:number,sparkly".parse::<Field>(),
        Err(SchemaError::InvalidField { .. })
    ));
}

/// Test that an entity file deserializes with its defaults
#[test]
fn test_entity_file_format() {
    let definition: EntityDefinition = serde_json::from_value(json!({
        "fields": [
            { "name": "id", "type": "number", "primary": true, "autoIncrement": true },
            { "name": "title", "type": "text", "required": true }
        ],
        "relations": [
            {
                "type": "belongsTo",
                "field": "author_id",
                "reference": { "entity": "user", "field": "id", "as": "posts" },
                "onDelete": "cascade"
            }
        ]
    }))
    .expect("Failed to parse entity file");

    assert!(definition.id.is_none());
    assert!(definition.queries.is_empty());
    assert!(definition.fields[1].read);

    let relation = &definition.relations[0];
    assert_eq!(relation.kind, RelationKind::BelongsTo);
    assert_eq!(relation.field.as_deref(), Some("author_id"));
    assert_eq!(relation.reference.alias.as_deref(), Some("posts"));

    validate_definition("post", &definition).expect("Definition should be valid");
}

/// Test that every problem in a definition is reported at once
#[test]
fn test_validation_collects_errors() {
    let definition = EntityDefinition::new()
        .field(id())
        .field(id())
        .field(Field::new("title", FieldType::Text).auto_increment())
        .relation(RelationDefinition::new(RelationKind::HasMany, "comment"));

    match validate_definition("post", &definition) {
        Err(SchemaError::ValidationFailed { count, errors }) => {
            assert_eq!(count, 3);
            assert_eq!(errors.len(), 3);
        }
        other => panic!("expected ValidationFailed, got {other:?}"),
    }

    assert!(matches!(
        validate_definition("1post", &EntityDefinition::new().field(id())),
        Err(SchemaError::InvalidEntity { .. })
    ));
}

/// Test that the project enforces validation and name uniqueness
#[tokio::test]
async fn test_project_rejects_invalid_entities() {
    let mut project = project();

    let err = project
        .add("bad name", EntityDefinition::new().field(id()))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    project.add("user", EntityDefinition::new().field(id())).await.unwrap();
    assert!(matches!(
        project.add("user", EntityDefinition::new().field(id())).await,
        Err(MigrationError::Conflict(_))
    ));

    // Re-adding an overwritable definition is a no-op.
    let pairs = project
        .add("user", EntityDefinition::new().field(id()).overwritable())
        .await
        .unwrap();
    assert!(pairs.is_empty());

    assert!(matches!(
        project
            .add(
                "post",
                EntityDefinition::new()
                    .field(id())
                    .relation(RelationDefinition::belongs_to("ghost")),
            )
            .await,
        Err(MigrationError::NotFound { kind: "entity", .. })
    ));

    // Nothing rejected made it into the history.
    assert_eq!(project.history().undo_stack().len(), 1);
}

/// Test that new entities get the default CRUD queries
#[tokio::test]
async fn test_default_queries() {
    let mut project = project();
    project.add("user", EntityDefinition::new().field(id())).await.unwrap();

    let kinds: Vec<QueryKind> = project
        .get("user")
        .unwrap()
        .queries
        .iter()
        .map(|q| q.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            QueryKind::List,
            QueryKind::Get,
            QueryKind::Create,
            QueryKind::Update,
            QueryKind::Delete,
        ]
    );
}

/// Test the foreign key a `belongsTo` relation generates
#[tokio::test]
async fn test_belongs_to_generates_field() {
    let mut project = project();
    project.add("user", EntityDefinition::new().field(id())).await.unwrap();
    project
        .add(
            "post",
            EntityDefinition::new()
                .field(id())
                .relation(RelationDefinition::belongs_to("user").field("author_id")),
        )
        .await
        .unwrap();

    let post = project.get("post").unwrap();
    let field = post.field("author_id").expect("Foreign key field missing");
    assert!(field.is_derived());
    assert_eq!(field.field_type, FieldType::Number);
    assert_eq!(post.authored_fields().count(), 1);
}
