//! Schema construction and validation.

use std::collections::HashMap;

use super::entity::EntityType;
use super::relation::RelationDescriptor;
use crate::error::SchemaError;

/// Index of an entity node in a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityIdx(pub(crate) usize);

/// A relation whose target has been resolved to a node index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelation {
    /// Declared relation.
    pub descriptor: RelationDescriptor,
    /// Target entity node.
    pub target: EntityIdx,
}

/// An entity type together with its outgoing relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityNode {
    /// Entity type.
    pub entity: EntityType,
    /// Outgoing relations in declaration order.
    pub relations: Vec<ResolvedRelation>,
}

/// Immutable, validated set of entity types and relations.
///
/// Relations are held by name and target index rather than by live
/// references, so bidirectional associations never form ownership cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    version: u64,
    nodes: Vec<EntityNode>,
    by_name: HashMap<String, EntityIdx>,
}

impl Schema {
    /// Schema version, used to invalidate cached plans.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up an entity node index by name.
    pub fn lookup(&self, name: &str) -> Option<EntityIdx> {
        self.by_name.get(name).copied()
    }

    /// Get an entity node.
    pub fn node(&self, idx: EntityIdx) -> &EntityNode {
        &self.nodes[idx.0]
    }

    /// Get an entity type.
    pub fn entity(&self, idx: EntityIdx) -> &EntityType {
        &self.nodes[idx.0].entity
    }

    /// Get a relation of an entity by name.
    pub fn relation(&self, idx: EntityIdx, name: &str) -> Option<&ResolvedRelation> {
        self.nodes[idx.0]
            .relations
            .iter()
            .find(|r| r.descriptor.name == name)
    }

    /// Entity names in declaration order.
    pub fn entity_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.entity.name.as_str()).collect()
    }
}

/// Builder collecting entity types and relations before validation.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    version: u64,
    entities: Vec<EntityType>,
    relations: Vec<(String, RelationDescriptor)>,
}

impl SchemaBuilder {
    /// Create a builder for the given schema version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add an entity type.
    pub fn with_entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add a relation owned by `owner`.
    pub fn with_relation(mut self, owner: impl Into<String>, relation: RelationDescriptor) -> Self {
        self.relations.push((owner.into(), relation));
        self
    }

    /// Validate and build the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut by_name = HashMap::with_capacity(self.entities.len());
        let mut nodes = Vec::with_capacity(self.entities.len());

        for entity in self.entities {
            if by_name.contains_key(&entity.name) {
                return Err(SchemaError::DuplicateEntity {
                    entity: entity.name,
                });
            }
            by_name.insert(entity.name.clone(), EntityIdx(nodes.len()));
            nodes.push(EntityNode {
                entity,
                relations: Vec::new(),
            });
        }

        for (owner, descriptor) in self.relations {
            let owner_idx = *by_name
                .get(&owner)
                .ok_or_else(|| SchemaError::UnknownEntity {
                    entity: owner.clone(),
                })?;
            let target_idx =
                *by_name
                    .get(&descriptor.target)
                    .ok_or_else(|| SchemaError::UnknownTarget {
                        entity: owner.clone(),
                        relation: descriptor.name.clone(),
                        target: descriptor.target.clone(),
                    })?;

            let owner_node = &nodes[owner_idx.0];
            if owner_node
                .relations
                .iter()
                .any(|r| r.descriptor.name == descriptor.name)
            {
                return Err(SchemaError::DuplicateRelation {
                    entity: owner,
                    relation: descriptor.name,
                });
            }
            if !owner_node.entity.has_field(&descriptor.local_field) {
                return Err(SchemaError::UnknownJoinField {
                    relation: descriptor.name,
                    entity: owner,
                    field: descriptor.local_field,
                });
            }
            let target_entity = &nodes[target_idx.0].entity;
            if !target_entity.has_field(&descriptor.foreign_field) {
                return Err(SchemaError::UnknownJoinField {
                    relation: descriptor.name,
                    entity: target_entity.name.clone(),
                    field: descriptor.foreign_field,
                });
            }

            nodes[owner_idx.0].relations.push(ResolvedRelation {
                descriptor,
                target: target_idx,
            });
        }

        let schema = Schema {
            version: self.version,
            nodes,
            by_name,
        };
        check_cycles(&schema)?;
        Ok(schema)
    }
}

/// Reject cycles formed by owned (non-back-reference) relations.
fn check_cycles(schema: &Schema) -> Result<(), SchemaError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        schema: &Schema,
        idx: EntityIdx,
        marks: &mut [Mark],
        stack: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        marks[idx.0] = Mark::OnStack;
        let node = schema.node(idx);
        for relation in &node.relations {
            if relation.descriptor.back_reference {
                continue;
            }
            stack.push(format!("{}.{}", node.entity.name, relation.descriptor.name));
            match marks[relation.target.0] {
                Mark::OnStack => {
                    let cycle = format!(
                        "{} -> {}",
                        stack.join(" -> "),
                        schema.entity(relation.target).name
                    );
                    return Err(SchemaError::Cycle { cycle });
                }
                Mark::Unvisited => visit(schema, relation.target, marks, stack)?,
                Mark::Done => {}
            }
            stack.pop();
        }
        marks[idx.0] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; schema.nodes.len()];
    for i in 0..schema.nodes.len() {
        if marks[i] == Mark::Unvisited {
            visit(schema, EntityIdx(i), &mut marks, &mut Vec::new())?;
        }
    }
    Ok(())
}
