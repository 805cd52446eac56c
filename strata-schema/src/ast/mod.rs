//! Entity model types.
//!
//! This module contains the value types that describe entities, their fields,
//! relations and queries.

mod entity;
mod field;
mod query;
mod relation;
mod types;

pub use entity::*;
pub use field::*;
pub use query::*;
pub use relation::*;
pub use types::*;
