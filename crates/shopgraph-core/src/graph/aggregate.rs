//! Entity graphs: a schema viewed from one root entity type.

use std::sync::Arc;

use super::entity::EntityType;
use super::relation::RelationDescriptor;
use super::schema::{EntityIdx, Schema};
use crate::error::SchemaError;

/// Describe the aggregate rooted at `root`.
///
/// Fails if `root` is not declared in the schema.
pub fn describe(schema: Arc<Schema>, root: &str) -> Result<EntityGraph, SchemaError> {
    let root_idx = schema.lookup(root).ok_or_else(|| SchemaError::UnknownEntity {
        entity: root.to_string(),
    })?;
    Ok(EntityGraph {
        schema,
        root: root_idx,
    })
}

/// Read-only view of a schema rooted at one entity type.
///
/// Cheap to clone and safe to share across requests.
#[derive(Debug, Clone)]
pub struct EntityGraph {
    schema: Arc<Schema>,
    root: EntityIdx,
}

/// One resolved hop of a relation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Relation followed by this hop.
    pub relation: RelationDescriptor,
    /// Entity owning the relation.
    pub owner: EntityIdx,
    /// Entity reached by the relation.
    pub target: EntityIdx,
}

/// A dot-separated relation path resolved against an entity graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The path as written.
    pub path: String,
    /// Resolved hops, root first.
    pub segments: Vec<PathSegment>,
}

impl ResolvedPath {
    /// Entity reached at the end of the path.
    pub fn target(&self) -> Option<EntityIdx> {
        self.segments.last().map(|s| s.target)
    }

    /// Last relation of the path.
    pub fn relation(&self) -> Option<&RelationDescriptor> {
        self.segments.last().map(|s| &s.relation)
    }

    /// Number of hops.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Check whether any hop follows a back-reference.
    pub fn crosses_back_reference(&self) -> bool {
        self.segments.iter().any(|s| s.relation.back_reference)
    }

    /// Check whether any hop is a to-many relation.
    pub fn has_many(&self) -> bool {
        self.segments.iter().any(|s| s.relation.is_many())
    }
}

impl EntityGraph {
    /// The underlying schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Root entity index.
    pub fn root(&self) -> EntityIdx {
        self.root
    }

    /// Root entity type.
    pub fn root_entity(&self) -> &EntityType {
        self.schema.entity(self.root)
    }

    /// Root entity name.
    pub fn root_name(&self) -> &str {
        &self.root_entity().name
    }

    /// Entity type by index.
    pub fn entity(&self, idx: EntityIdx) -> &EntityType {
        self.schema.entity(idx)
    }

    /// Relations declared directly on the root, in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &RelationDescriptor> {
        self.schema
            .node(self.root)
            .relations
            .iter()
            .map(|r| &r.descriptor)
    }

    /// Resolve a dot-separated relation path from the root.
    ///
    /// The empty path resolves to the root itself with no segments.
    pub fn resolve(&self, path: &str) -> Result<ResolvedPath, SchemaError> {
        let mut segments = Vec::new();
        let mut current = self.root;

        if !path.is_empty() {
            for name in path.split('.') {
                let relation = self.schema.relation(current, name).ok_or_else(|| {
                    SchemaError::UnknownRelation {
                        entity: self.schema.entity(current).name.clone(),
                        relation: name.to_string(),
                    }
                })?;
                segments.push(PathSegment {
                    relation: relation.descriptor.clone(),
                    owner: current,
                    target: relation.target,
                });
                current = relation.target;
            }
        }

        Ok(ResolvedPath {
            path: path.to_string(),
            segments,
        })
    }

    /// Entity reached by a path, or the root for the empty path.
    pub fn entity_at(&self, path: &str) -> Result<&EntityType, SchemaError> {
        let resolved = self.resolve(path)?;
        Ok(self.entity(resolved.target().unwrap_or(self.root)))
    }
}
