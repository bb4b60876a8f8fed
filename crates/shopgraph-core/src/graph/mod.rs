//! Entity graph model.
//!
//! Describes the shape of the domain's aggregates: entity types, their
//! relations, each relation's cardinality and declared fetch cost. A
//! [`Schema`] is built once at process start and shared read-only; an
//! [`EntityGraph`] is a view of the schema rooted at one entity type.

mod aggregate;
mod entity;
mod relation;
mod schema;

pub use aggregate::{describe, EntityGraph, PathSegment, ResolvedPath};
pub use entity::EntityType;
pub use relation::{Cardinality, FetchStrategy, RelationDescriptor};
pub use schema::{EntityIdx, EntityNode, ResolvedRelation, Schema, SchemaBuilder};
