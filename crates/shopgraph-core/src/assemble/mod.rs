//! Result assembly.
//!
//! Folds the row sets of an executed plan into caller-facing DTOs. Entities
//! are materialized into an arena keyed by (owner node, relation, identity),
//! so repeated owner columns produced by join fan-out collapse into a single
//! node and children accumulate in first-seen order. Every requested relation
//! slot exists on its owner even when nothing was found, which keeps
//! "requested but empty" distinct from "not requested".

use std::collections::HashMap;

use shopgraph_proto::{
    AssembledDto, EntityDto, FlatDto, IdentityKey, RelationDto, RelationValue, Value,
};
use tracing::debug;

use crate::error::QueryExecutionError;
use crate::exec::{ResultRow, RowSet};
use crate::graph::Cardinality;
use crate::plan::{AssemblyShape, FetchPlan, PathShape, QueryStep, StepId};

/// Builds DTOs from the rows of an executed plan.
pub struct ResultAssembler;

impl ResultAssembler {
    /// Assemble DTOs for a plan from one row set per step.
    ///
    /// Graph shapes yield one DTO per distinct root identity of step 0, in
    /// first-seen order. Flat shapes yield one DTO per row of step 0.
    pub fn assemble(
        plan: &FetchPlan,
        row_sets: &[RowSet],
    ) -> Result<Vec<AssembledDto>, QueryExecutionError> {
        let dtos: Vec<AssembledDto> = match &plan.shape {
            AssemblyShape::Flat { labels } => {
                let rows = row_sets.first().map(|r| r.rows.as_slice()).unwrap_or(&[]);
                rows.iter()
                    .map(|row| {
                        AssembledDto::Flat(FlatDto {
                            columns: labels.iter().cloned().zip(row.values.iter().cloned()).collect(),
                        })
                    })
                    .collect()
            }
            AssemblyShape::Graph {
                root_entity,
                root_identity,
                root_fields,
                relations,
            } => {
                let mut arena = Arena::new(root_entity, root_fields, relations);
                for rows in row_sets {
                    let step = plan.steps.get(rows.step).ok_or_else(|| {
                        QueryExecutionError::Inconsistent {
                            step: rows.step,
                            detail: "row set for a step outside the plan".into(),
                        }
                    })?;
                    let layout = StepLayout::new(step, root_identity, root_fields, relations)?;
                    for row in &rows.rows {
                        arena.absorb(step.id, &layout, row)?;
                    }
                }
                arena
                    .into_dtos()
                    .into_iter()
                    .map(AssembledDto::Entity)
                    .collect()
            }
        };

        debug!(root = %plan.root, dtos = dtos.len(), "assembled result");
        Ok(dtos)
    }
}

/// Column positions of one step.
struct StepLayout {
    root_id: usize,
    root_fields: Vec<Option<usize>>,
    /// Per relation: identity column and field columns, if the step covers it.
    relations: Vec<Option<(usize, Vec<Option<usize>>)>>,
}

impl StepLayout {
    fn new(
        step: &QueryStep,
        root_identity: &str,
        root_fields: &[String],
        relations: &[PathShape],
    ) -> Result<Self, QueryExecutionError> {
        let root_id =
            step.column_index("", root_identity)
                .ok_or_else(|| QueryExecutionError::Inconsistent {
                    step: step.id,
                    detail: format!("root identity '{}' not selected", root_identity),
                })?;
        let root_fields = root_fields
            .iter()
            .map(|f| step.column_index("", f))
            .collect();
        let relations = relations
            .iter()
            .map(|rel| {
                step.column_index(&rel.path, &rel.identity).map(|id| {
                    let fields = rel
                        .fields
                        .iter()
                        .map(|f| step.column_index(&rel.path, f))
                        .collect();
                    (id, fields)
                })
            })
            .collect();
        Ok(Self {
            root_id,
            root_fields,
            relations,
        })
    }
}

enum Slot {
    One(Option<usize>),
    Many(Vec<usize>),
}

struct Node {
    entity: String,
    id: Value,
    fields: Vec<(String, Value)>,
    /// One slot per child relation, aligned with `Arena::children`.
    slots: Vec<Slot>,
    /// Relation index of this node (`None` for roots).
    relation: Option<usize>,
}

/// Owner of a relation: a root or another relation.
const ROOT: usize = usize::MAX;

struct Arena<'p> {
    root_entity: &'p str,
    root_fields: &'p [String],
    relations: &'p [PathShape],
    /// Owner relation index per relation (`ROOT` for top-level).
    parents: Vec<usize>,
    /// Child relation indices per owner (roots at index `relations.len()`).
    children: Vec<Vec<usize>>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
    root_index: HashMap<IdentityKey, usize>,
    index: HashMap<(usize, usize, IdentityKey), usize>,
}

impl<'p> Arena<'p> {
    fn new(root_entity: &'p str, root_fields: &'p [String], relations: &'p [PathShape]) -> Self {
        let parents: Vec<usize> = relations
            .iter()
            .map(|rel| {
                relations
                    .iter()
                    .position(|p| p.path == rel.parent)
                    .unwrap_or(ROOT)
            })
            .collect();
        let mut children = vec![Vec::new(); relations.len() + 1];
        for (i, &parent) in parents.iter().enumerate() {
            let owner = if parent == ROOT { relations.len() } else { parent };
            children[owner].push(i);
        }
        Self {
            root_entity,
            root_fields,
            relations,
            parents,
            children,
            nodes: Vec::new(),
            roots: Vec::new(),
            root_index: HashMap::new(),
            index: HashMap::new(),
        }
    }

    fn new_node(
        &mut self,
        entity: &str,
        id: Value,
        relation: Option<usize>,
        names: &[String],
        columns: &[Option<usize>],
        row: &ResultRow,
    ) -> usize {
        let fields = names
            .iter()
            .zip(columns)
            .map(|(name, col)| {
                let value = col.and_then(|c| row.get(c)).cloned().unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect();
        let owner = relation.unwrap_or(self.relations.len());
        let slots = self.children[owner]
            .iter()
            .map(|&child| match self.relations[child].cardinality {
                Cardinality::One => Slot::One(None),
                Cardinality::Many => Slot::Many(Vec::new()),
            })
            .collect();
        self.nodes.push(Node {
            entity: entity.to_string(),
            id,
            fields,
            slots,
            relation,
        });
        self.nodes.len() - 1
    }

    fn absorb(
        &mut self,
        step: StepId,
        layout: &StepLayout,
        row: &ResultRow,
    ) -> Result<(), QueryExecutionError> {
        let relations = self.relations;
        let root_key = row.identity_at(layout.root_id).ok_or_else(|| {
            QueryExecutionError::Inconsistent {
                step,
                detail: "row without root identity".into(),
            }
        })?;

        let root = match self.root_index.get(&root_key) {
            Some(&node) => node,
            None if step == 0 => {
                let id = row.values[layout.root_id].clone();
                let (entity, names) = (self.root_entity, self.root_fields);
                let node = self.new_node(entity, id, None, names, &layout.root_fields, row);
                self.root_index.insert(root_key, node);
                self.roots.push(node);
                node
            }
            None => {
                return Err(QueryExecutionError::Inconsistent {
                    step,
                    detail: "row references a root the root step did not return".into(),
                })
            }
        };

        let mut resolved: Vec<Option<usize>> = vec![None; relations.len()];
        for (i, rel) in relations.iter().enumerate() {
            let Some((id_col, field_cols)) = &layout.relations[i] else {
                continue;
            };
            let owner = match self.parents[i] {
                ROOT => Some(root),
                parent => resolved[parent],
            };
            let Some(owner) = owner else {
                continue;
            };
            // Left-outer join miss.
            let Some(key) = row.identity_at(*id_col) else {
                continue;
            };

            let node = match self.index.get(&(owner, i, key.clone())) {
                Some(&node) => node,
                None if rel.step == step => {
                    let id = row.values[*id_col].clone();
                    let node = self.new_node(&rel.entity, id, Some(i), &rel.fields, field_cols, row);
                    self.index.insert((owner, i, key), node);
                    self.attach(owner, i, node);
                    node
                }
                None => {
                    return Err(QueryExecutionError::Inconsistent {
                        step,
                        detail: format!("'{}' row not returned by step {}", rel.path, rel.step),
                    })
                }
            };
            resolved[i] = Some(node);
        }
        Ok(())
    }

    fn attach(&mut self, owner: usize, relation: usize, child: usize) {
        let group = self.nodes[owner].relation.unwrap_or(self.relations.len());
        let Some(position) = self.children[group].iter().position(|&c| c == relation) else {
            return;
        };
        match &mut self.nodes[owner].slots[position] {
            Slot::One(slot) => *slot = Some(child),
            Slot::Many(children) => children.push(child),
        }
    }

    fn into_dtos(mut self) -> Vec<EntityDto> {
        let roots = std::mem::take(&mut self.roots);
        roots.into_iter().map(|root| self.build(root)).collect()
    }

    fn build(&mut self, idx: usize) -> EntityDto {
        let group = self.nodes[idx].relation.unwrap_or(self.relations.len());
        let slots = std::mem::take(&mut self.nodes[idx].slots);
        let child_relations = self.children[group].clone();

        let relations = child_relations
            .into_iter()
            .zip(slots)
            .map(|(rel, slot)| RelationDto {
                name: self.relations[rel].name.clone(),
                value: match slot {
                    Slot::One(child) => RelationValue::One(child.map(|c| Box::new(self.build(c)))),
                    Slot::Many(children) => {
                        RelationValue::Many(children.into_iter().map(|c| self.build(c)).collect())
                    }
                },
            })
            .collect();

        let node = &mut self.nodes[idx];
        EntityDto {
            entity: std::mem::take(&mut node.entity),
            id: std::mem::replace(&mut node.id, Value::Null),
            fields: std::mem::take(&mut node.fields),
            relations,
        }
    }
}
