//! # strata-schema
//!
//! Entity model for the Strata low-code backend.
//!
//! This crate provides:
//! - Value types for entities, fields, relations and queries
//! - The `name:type,flags` field shorthand parser
//! - Validation of standalone entity definitions
//! - Configuration parser for `strata.toml` files
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_schema::{EntityDefinition, Field, RelationDefinition, StrataConfig};
//!
//! let post = EntityDefinition::new()
//!     .field("id:number,primary,unique,autoIncrement,required".parse()?)
//!     .field("title:text,required".parse()?)
//!     .relation(RelationDefinition::belongs_to("user").field("author_id"));
//!
//! strata_schema::validate_definition("post", &post)?;
//!
//! let config = StrataConfig::from_file("strata.toml")?;
//! ```

pub mod ast;
pub mod config;
pub mod error;
pub mod validator;

pub use ast::*;
pub use config::{StrataConfig, SyncOnLoad};
pub use error::{SchemaError, SchemaResult};
pub use validator::{Validator, validate_definition, validate_name};
