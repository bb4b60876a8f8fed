//! Fetch plan selection.
//!
//! The selector turns a [`ProjectionRequest`] into a [`FetchPlan`] with the
//! fewest round trips that keep the estimated row fan-out bounded:
//!
//! - to-one paths are always joined into the root step
//! - each independent to-many group becomes a batched collection step keyed
//!   by the root ids of the root step (or is join-fetched into the root step
//!   when it is the only group, declared eager and the roots are unpaginated)
//! - flat shapes become a single direct projection step

use std::collections::HashMap;

use shopgraph_proto::{ColumnSelect, ProjectionRequest, RelationInclude, Shape};
use tracing::debug;

use super::policy::FetchPolicy;
use super::step::{
    root_order, AssemblyShape, ColumnRef, FetchPlan, JoinSpec, PathShape, PlanStrategy,
    QueryStep, StepKind,
};
use crate::error::{PlanError, SchemaError};
use crate::graph::{Cardinality, EntityGraph, EntityType, FetchStrategy, ResolvedPath};

/// A requested relation path resolved against the graph.
#[derive(Debug, Clone)]
struct PlannedPath {
    resolved: ResolvedPath,
    /// Fields to select on the target, identity first.
    fields: Vec<String>,
    /// Prefixes ending in a to-many relation, shortest first.
    collections: Vec<String>,
}

impl PlannedPath {
    fn path(&self) -> &str {
        &self.resolved.path
    }

    /// The deepest to-many prefix; the collection this path belongs to.
    fn anchor(&self) -> Option<&str> {
        self.collections.last().map(String::as_str)
    }

    fn is_collection(&self) -> bool {
        self.anchor() == Some(self.path())
    }

    /// Whether this path is a strict ancestor of `other`.
    fn is_ancestor_of(&self, other: &PlannedPath) -> bool {
        other
            .path()
            .strip_prefix(self.path())
            .is_some_and(|rest| rest.starts_with('.'))
    }

    fn parent(&self) -> String {
        self.resolved
            .path
            .rsplit_once('.')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default()
    }
}

/// One chain of nested to-many relations and the paths it materializes.
///
/// Sibling collections never share a group; joining them in one step would
/// multiply their rows.
#[derive(Debug)]
struct CollectionGroup {
    /// Deepest collection of the chain.
    anchor: String,
    /// To-many paths along the chain, shortest first.
    chain: Vec<String>,
    /// Paths whose nodes this group creates.
    members: Vec<usize>,
}

/// Chooses fetch plans under a [`FetchPolicy`].
#[derive(Debug, Clone, Default)]
pub struct FetchPlanSelector {
    policy: FetchPolicy,
}

impl FetchPlanSelector {
    /// Create a selector with the given policy.
    pub fn new(policy: FetchPolicy) -> Self {
        Self { policy }
    }

    /// The policy in use.
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Plan a request against an entity graph.
    pub fn select(
        &self,
        graph: &EntityGraph,
        request: &ProjectionRequest,
    ) -> Result<FetchPlan, PlanError> {
        if request.root != graph.root_name() {
            return Err(PlanError::RootMismatch {
                requested: request.root.clone(),
                graph: graph.root_name().to_string(),
            });
        }

        let root = graph.root_entity();
        validate_root_predicates(root, request)?;

        let plan = match &request.shape {
            Shape::Graph { fields, includes } => {
                self.select_graph(graph, request, fields, includes)?
            }
            Shape::Flat { columns } => self.select_flat(graph, request, columns)?,
        };

        debug!(
            root = %plan.root,
            strategy = %plan.strategy,
            steps = plan.steps.len(),
            "selected fetch plan"
        );
        Ok(plan)
    }

    fn select_graph(
        &self,
        graph: &EntityGraph,
        request: &ProjectionRequest,
        fields: &[String],
        includes: &[RelationInclude],
    ) -> Result<FetchPlan, PlanError> {
        let root = graph.root_entity();
        let root_fields = select_fields(root, fields)?;

        let mut requested: Vec<(String, Vec<String>)> = Vec::new();
        for include in includes {
            // Implied ancestors select all of their fields.
            let segments: Vec<&str> = include.path.split('.').collect();
            for end in 1..segments.len() {
                let ancestor = segments[..end].join(".");
                if !requested.iter().any(|(p, _)| *p == ancestor) {
                    requested.push((ancestor, Vec::new()));
                }
            }
            match requested.iter_mut().find(|(p, _)| *p == include.path) {
                Some((_, existing)) => *existing = include.fields.clone(),
                None => requested.push((include.path.clone(), include.fields.clone())),
            }
        }

        let mut paths = Vec::with_capacity(requested.len());
        for (path, fields) in &requested {
            let planned = self.plan_path(graph, path, Some(fields))?;
            if planned.resolved.crosses_back_reference() {
                return Err(PlanError::BackReference { path: path.clone() });
            }
            paths.push(planned);
        }
        // Stable: parents before children, request order otherwise.
        paths.sort_by_key(|p| p.resolved.depth());

        let groups = self.group_collections(&paths)?;

        let identity = root.identity_field.clone();
        let mut root_step = QueryStep {
            id: 0,
            kind: StepKind::Root,
            entity: root.name.clone(),
            identity_field: identity.clone(),
            joins: Vec::new(),
            columns: root_fields
                .iter()
                .map(|f| ColumnRef::new("", f.as_str()))
                .collect(),
            filter: request.filter.clone(),
            root_ids: request.root_ids.clone(),
            order_by: root_order(request, &identity),
            pagination: request.pagination.clone(),
            depends_on: None,
            batch_size: 0,
        };

        let mut step_of_path: HashMap<String, usize> = HashMap::new();
        for planned in paths.iter().filter(|p| p.collections.is_empty()) {
            add_path(&mut root_step, planned);
            step_of_path.insert(planned.path().to_string(), 0);
        }

        let join_fetch = groups.len() == 1
            && request.pagination.is_none()
            && groups[0].chain.iter().all(|collection| {
                paths
                    .iter()
                    .find(|p| p.path() == collection)
                    .and_then(|p| p.resolved.relation())
                    .is_some_and(|r| r.strategy == FetchStrategy::EagerJoin)
            });

        let mut steps = Vec::with_capacity(groups.len() + 1);
        let strategy = if groups.is_empty() {
            PlanStrategy::SingleStep
        } else if join_fetch {
            for &member in &groups[0].members {
                add_path(&mut root_step, &paths[member]);
                step_of_path.insert(paths[member].path().to_string(), 0);
            }
            PlanStrategy::JoinFetch
        } else {
            PlanStrategy::BatchedCollections
        };
        steps.push(root_step);

        if strategy == PlanStrategy::BatchedCollections {
            for group in &groups {
                let id = steps.len();
                let mut step = QueryStep {
                    id,
                    kind: StepKind::Collection {
                        anchor: group.anchor.clone(),
                    },
                    entity: root.name.clone(),
                    identity_field: identity.clone(),
                    joins: Vec::new(),
                    columns: vec![ColumnRef::new("", identity.as_str())],
                    filter: None,
                    root_ids: Vec::new(),
                    order_by: Vec::new(),
                    pagination: None,
                    depends_on: Some(0),
                    batch_size: self.policy.batch_size.max(1),
                };

                // Ancestors materialized by an earlier step are joined by
                // identity only so rows attach to the existing nodes.
                for (i, planned) in paths.iter().enumerate() {
                    if group.members.contains(&i) {
                        add_path(&mut step, planned);
                        step_of_path.insert(planned.path().to_string(), id);
                    } else if group.members.iter().any(|&m| planned.is_ancestor_of(&paths[m])) {
                        step.joins.push(join_spec(planned));
                        let identity = planned.fields[0].as_str();
                        step.columns.push(ColumnRef::new(planned.path(), identity));
                    }
                }
                steps.push(step);
            }
        }

        let relations = paths
            .iter()
            .map(|p| {
                let relation = p.resolved.relation();
                PathShape {
                    path: p.path().to_string(),
                    parent: p.parent(),
                    name: relation.map(|r| r.name.clone()).unwrap_or_default(),
                    entity: relation.map(|r| r.target.clone()).unwrap_or_default(),
                    identity: p.fields[0].clone(),
                    cardinality: relation
                        .map(|r| r.cardinality)
                        .unwrap_or(Cardinality::One),
                    fields: requested_fields(&requested, p.path(), &p.fields),
                    step: step_of_path.get(p.path()).copied().unwrap_or(0),
                }
            })
            .collect();

        Ok(FetchPlan {
            root: root.name.clone(),
            strategy,
            steps,
            shape: AssemblyShape::Graph {
                root_entity: root.name.clone(),
                root_identity: identity,
                root_fields: dto_fields(fields, &root_fields),
                relations,
            },
            schema_version: graph.schema().version(),
        })
    }

    fn select_flat(
        &self,
        graph: &EntityGraph,
        request: &ProjectionRequest,
        columns: &[ColumnSelect],
    ) -> Result<FetchPlan, PlanError> {
        if columns.is_empty() {
            return Err(PlanError::EmptyProjection);
        }
        let root = graph.root_entity();

        let mut needed: Vec<String> = Vec::new();
        for column in columns {
            if column.path.is_empty() {
                continue;
            }
            let segments: Vec<&str> = column.path.split('.').collect();
            for end in 1..=segments.len() {
                let prefix = segments[..end].join(".");
                if !needed.contains(&prefix) {
                    needed.push(prefix);
                }
            }
        }

        let mut paths = Vec::with_capacity(needed.len());
        for path in &needed {
            paths.push(self.plan_path(graph, path, None)?);
        }
        paths.sort_by_key(|p| p.resolved.depth());

        // Direct projections have no second step to move a collection into.
        let groups = self.group_collections(&paths)?;
        if groups.len() > 1 {
            return Err(independent_collections(&groups, 1));
        }

        let mut selected = Vec::with_capacity(columns.len());
        for column in columns {
            let entity = graph
                .entity_at(&column.path)
                .map_err(|source| PlanError::UnknownPath {
                    path: column.path.clone(),
                    source,
                })?;
            if !entity.has_field(&column.field) {
                return Err(PlanError::UnknownField {
                    entity: entity.name.clone(),
                    field: column.field.clone(),
                });
            }
            selected.push(
                ColumnRef::new(column.path.as_str(), column.field.as_str())
                    .with_label(column.label()),
            );
        }

        let identity = root.identity_field.clone();
        let step = QueryStep {
            id: 0,
            kind: StepKind::Projection,
            entity: root.name.clone(),
            identity_field: identity.clone(),
            joins: paths.iter().map(join_spec).collect(),
            columns: selected,
            filter: request.filter.clone(),
            root_ids: request.root_ids.clone(),
            order_by: root_order(request, &identity),
            pagination: request.pagination.clone(),
            depends_on: None,
            batch_size: 0,
        };

        Ok(FetchPlan {
            root: root.name.clone(),
            strategy: PlanStrategy::DirectProjection,
            shape: AssemblyShape::Flat {
                labels: step.columns.iter().map(|c| c.label.clone()).collect(),
            },
            steps: vec![step],
            schema_version: graph.schema().version(),
        })
    }

    /// Resolve a path and check its depth and fields.
    ///
    /// `fields` of `None` selects only the target identity.
    fn plan_path(
        &self,
        graph: &EntityGraph,
        path: &str,
        fields: Option<&Vec<String>>,
    ) -> Result<PlannedPath, PlanError> {
        if path.is_empty() {
            return Err(PlanError::UnknownPath {
                path: String::new(),
                source: SchemaError::UnknownRelation {
                    entity: graph.root_name().to_string(),
                    relation: String::new(),
                },
            });
        }
        let depth = path.matches('.').count() + 1;
        if depth > self.policy.max_depth {
            return Err(PlanError::DepthExceeded {
                path: path.to_string(),
                depth,
                max: self.policy.max_depth,
            });
        }

        let resolved = graph
            .resolve(path)
            .map_err(|source| PlanError::UnknownPath {
                path: path.to_string(),
                source,
            })?;
        let target = graph.entity(resolved.target().unwrap_or(graph.root()));
        let fields = match fields {
            Some(fields) => select_fields(target, fields)?,
            None => vec![target.identity_field.clone()],
        };

        let collections = resolved
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.relation.is_many())
            .map(|(i, _)| {
                resolved.segments[..=i]
                    .iter()
                    .map(|s| s.relation.name.as_str())
                    .collect::<Vec<_>>()
                    .join(".")
            })
            .collect();

        Ok(PlannedPath {
            resolved,
            fields,
            collections,
        })
    }

    /// Split to-many paths into independent chains and check the policy
    /// limits.
    ///
    /// Every collection with no nested collection below it ends one chain.
    /// A collection shared by several chains belongs to the first of them.
    fn group_collections(&self, paths: &[PlannedPath]) -> Result<Vec<CollectionGroup>, PlanError> {
        let mut groups: Vec<CollectionGroup> = paths
            .iter()
            .filter(|p| p.is_collection())
            .filter(|p| !paths.iter().any(|q| q.is_collection() && p.is_ancestor_of(q)))
            .map(|leaf| CollectionGroup {
                anchor: leaf.path().to_string(),
                chain: leaf.collections.clone(),
                members: Vec::new(),
            })
            .collect();
        for (i, planned) in paths.iter().enumerate() {
            let Some(anchor) = planned.anchor() else {
                continue;
            };
            if let Some(group) = groups.iter_mut().find(|g| g.chain.iter().any(|c| c == anchor)) {
                group.members.push(i);
            }
        }

        if groups.len() > self.policy.max_collection_steps {
            return Err(independent_collections(
                &groups,
                self.policy.max_collection_steps,
            ));
        }

        for group in &groups {
            let estimated = group
                .chain
                .iter()
                .filter_map(|c| paths.iter().find(|p| p.path() == c))
                .filter_map(|p| p.resolved.relation())
                .fold(1u64, |acc, r| acc.saturating_mul(u64::from(r.fan_out)));
            if estimated > self.policy.max_fan_out {
                return Err(PlanError::FanOutCeiling {
                    path: group.anchor.clone(),
                    estimated,
                    ceiling: self.policy.max_fan_out,
                });
            }
        }

        Ok(groups)
    }
}

fn independent_collections(groups: &[CollectionGroup], max: usize) -> PlanError {
    PlanError::IndependentCollections {
        count: groups.len(),
        paths: groups
            .iter()
            .map(|g| g.anchor.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        max,
    }
}

/// Check that the root filter and ordering only reference root fields, and
/// that explicit root ids are identity values.
fn validate_root_predicates(root: &EntityType, request: &ProjectionRequest) -> Result<(), PlanError> {
    let filter_fields = request.filter.iter().flat_map(|f| f.fields());
    let order_fields = request.order_by.iter().map(|o| o.field.as_str());
    for field in filter_fields.chain(order_fields) {
        if !root.has_field(field) {
            return Err(PlanError::UnknownField {
                entity: root.name.clone(),
                field: field.to_string(),
            });
        }
    }
    check_root_ids(request)
}

/// Check that explicit root ids are identity values.
///
/// Root ids are literals, so a cached plan does not vouch for them.
pub fn check_root_ids(request: &ProjectionRequest) -> Result<(), PlanError> {
    match request.root_ids.iter().position(|id| id.identity_key().is_none()) {
        Some(position) => Err(PlanError::InvalidRootId { position }),
        None => Ok(()),
    }
}

/// Resolve requested fields to the selected column list, identity first.
/// An empty request selects every field.
fn select_fields(entity: &EntityType, requested: &[String]) -> Result<Vec<String>, PlanError> {
    if requested.is_empty() {
        return Ok(entity.fields.clone());
    }
    let mut fields = vec![entity.identity_field.clone()];
    for field in requested {
        if !entity.has_field(field) {
            return Err(PlanError::UnknownField {
                entity: entity.name.clone(),
                field: field.clone(),
            });
        }
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }
    Ok(fields)
}

/// Fields copied into a DTO: as requested, or every selected field.
fn dto_fields(requested: &[String], selected: &[String]) -> Vec<String> {
    if requested.is_empty() {
        selected.to_vec()
    } else {
        requested.to_vec()
    }
}

fn requested_fields(requested: &[(String, Vec<String>)], path: &str, selected: &[String]) -> Vec<String> {
    let explicit = requested
        .iter()
        .find(|(p, _)| p == path)
        .map(|(_, f)| f.as_slice())
        .unwrap_or(&[]);
    dto_fields(explicit, selected)
}

fn join_spec(planned: &PlannedPath) -> JoinSpec {
    let relation = planned.resolved.relation();
    JoinSpec {
        path: planned.path().to_string(),
        parent: planned.parent(),
        target: relation.map(|r| r.target.clone()).unwrap_or_default(),
        local_field: relation.map(|r| r.local_field.clone()).unwrap_or_default(),
        foreign_field: relation.map(|r| r.foreign_field.clone()).unwrap_or_default(),
        cardinality: relation
            .map(|r| r.cardinality)
            .unwrap_or(Cardinality::One),
    }
}

/// Join a path into a step and select its fields.
fn add_path(step: &mut QueryStep, planned: &PlannedPath) {
    step.joins.push(join_spec(planned));
    for field in &planned.fields {
        if step.column_index(planned.path(), field).is_none() {
            step.columns
                .push(ColumnRef::new(planned.path(), field.as_str()));
        }
    }
}
