//! Fetch plans and the query steps they are made of.

use std::fmt;

use serde::Serialize;
use shopgraph_proto::{FilterExpr, OrderDirection, OrderSpec, Pagination, ProjectionRequest, Value};

use crate::graph::Cardinality;

/// Position of a step within its plan.
pub type StepId = usize;

/// Overall strategy a plan follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// One round trip; only to-one relations are joined.
    SingleStep,
    /// One round trip with a to-many relation joined in; assembly dedups.
    JoinFetch,
    /// A root step followed by batched collection steps.
    BatchedCollections,
    /// One round trip selecting flat columns, no entity materialization.
    DirectProjection,
}

impl PlanStrategy {
    /// Stable name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStrategy::SingleStep => "single_step",
            PlanStrategy::JoinFetch => "join_fetch",
            PlanStrategy::BatchedCollections => "batched_collections",
            PlanStrategy::DirectProjection => "direct_projection",
        }
    }
}

impl fmt::Display for PlanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a step in its plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Root entities plus their to-one joins.
    Root,
    /// A to-many group loaded for the root ids of the root step.
    Collection {
        /// Path of the to-many relation anchoring the group.
        anchor: String,
    },
    /// Flat column projection.
    Projection,
}

/// A join from an already-joined path to a related entity.
///
/// All joins are left-outer: an owner without a match keeps its row with
/// nulls in the joined columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    /// Path of the joined entity (e.g. `"orderItems.item"`).
    pub path: String,
    /// Path of the owner (`""` for the root).
    pub parent: String,
    /// Target entity type.
    pub target: String,
    /// Join field on the owner.
    pub local_field: String,
    /// Join field on the target.
    pub foreign_field: String,
    /// Cardinality of the joined relation.
    pub cardinality: Cardinality,
}

/// A selected column: a field of the entity at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Relation path (`""` for the root).
    pub path: String,
    /// Field name.
    pub field: String,
    /// Output label.
    pub label: String,
}

impl ColumnRef {
    /// Column for a field at a path, labelled `path.field` (or `field` on the root).
    pub fn new(path: impl Into<String>, field: impl Into<String>) -> Self {
        let path = path.into();
        let field = field.into();
        let label = if path.is_empty() {
            field.clone()
        } else {
            format!("{}.{}", path, field)
        };
        Self { path, field, label }
    }

    /// Set the output label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// A single round trip to the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStep {
    /// Position in the plan.
    pub id: StepId,
    /// Step role.
    pub kind: StepKind,
    /// Entity type scanned by the step (always the plan root).
    pub entity: String,
    /// Identity field of `entity`.
    pub identity_field: String,
    /// Joins in parent-before-child order.
    pub joins: Vec<JoinSpec>,
    /// Projected columns; each result row has one value per column.
    pub columns: Vec<ColumnRef>,
    /// Filter over root fields.
    pub filter: Option<FilterExpr>,
    /// Explicit root identifiers from the request.
    pub root_ids: Vec<Value>,
    /// Root ordering.
    pub order_by: Vec<OrderSpec>,
    /// Root pagination.
    pub pagination: Option<Pagination>,
    /// Step whose root ids restrict this step.
    pub depends_on: Option<StepId>,
    /// Root ids per round trip when `depends_on` is set.
    pub batch_size: usize,
}

impl QueryStep {
    /// Index of the column selecting `field` at `path`.
    pub fn column_index(&self, path: &str, field: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.path == path && c.field == field)
    }

    /// Check whether this step selects anything at `path`.
    pub fn covers(&self, path: &str) -> bool {
        self.columns.iter().any(|c| c.path == path)
    }

    /// Number of round trips needed for `root_count` dependent root ids.
    pub fn round_trips_for(&self, root_count: usize) -> usize {
        match self.depends_on {
            None => 1,
            Some(_) if root_count == 0 => 0,
            Some(_) => root_count.div_ceil(self.batch_size.max(1)),
        }
    }
}

/// One relation path of a graph-shaped response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathShape {
    /// Full path (e.g. `"orderItems.item"`).
    pub path: String,
    /// Owner path (`""` for the root).
    pub parent: String,
    /// Relation name (last path segment).
    pub name: String,
    /// Target entity type.
    pub entity: String,
    /// Identity field of the target.
    pub identity: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Fields to copy into the DTO.
    pub fields: Vec<String>,
    /// Step that materializes this path.
    pub step: StepId,
}

/// How result rows turn into DTOs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyShape {
    /// Nested entity DTOs.
    Graph {
        /// Root entity type.
        root_entity: String,
        /// Root identity field.
        root_identity: String,
        /// Root fields to copy into the DTO.
        root_fields: Vec<String>,
        /// Included relation paths, parents before children.
        relations: Vec<PathShape>,
    },
    /// Flat rows with the given column labels.
    Flat {
        /// Output labels in column order.
        labels: Vec<String>,
    },
}

/// An ordered list of query steps plus the shape to assemble.
///
/// Derived deterministically from an entity graph and a request; owned by
/// one request for the duration of its execution.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    /// Root entity type.
    pub root: String,
    /// Strategy the selector chose.
    pub strategy: PlanStrategy,
    /// Steps in dependency order; step 0 never depends on another step.
    pub steps: Vec<QueryStep>,
    /// Response shape.
    pub shape: AssemblyShape,
    /// Schema version the plan was built against.
    pub schema_version: u64,
}

impl FetchPlan {
    /// Number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Steps that depend on `id`.
    pub fn dependents_of(&self, id: StepId) -> impl Iterator<Item = &QueryStep> {
        self.steps.iter().filter(move |s| s.depends_on == Some(id))
    }

    /// Copy of this plan with the request's literal values bound into the
    /// independent steps.
    ///
    /// Used when a cached plan is reused for a request of the same structure.
    pub fn rebind(&self, request: &ProjectionRequest) -> FetchPlan {
        let mut plan = self.clone();
        for step in plan.steps.iter_mut().filter(|s| s.depends_on.is_none()) {
            step.filter = request.filter.clone();
            step.root_ids = request.root_ids.clone();
            step.order_by = root_order(request, &step.identity_field);
            step.pagination = request.pagination.clone();
        }
        plan
    }

    /// Human-readable description of the plan.
    pub fn explain(&self) -> String {
        let mut out = format!(
            "FetchPlan {} strategy={} steps={}\n",
            self.root,
            self.strategy,
            self.steps.len()
        );
        for step in &self.steps {
            let kind = match &step.kind {
                StepKind::Root => "root".to_string(),
                StepKind::Collection { anchor } => format!("collection({})", anchor),
                StepKind::Projection => "projection".to_string(),
            };
            out.push_str(&format!("  step {} [{}] scan {}", step.id, kind, step.entity));
            if let Some(dep) = step.depends_on {
                out.push_str(&format!(
                    " for root ids of step {} in batches of {}",
                    dep, step.batch_size
                ));
            }
            out.push('\n');
            for join in &step.joins {
                let arrow = match join.cardinality {
                    Cardinality::One => "->",
                    Cardinality::Many => "=>",
                };
                out.push_str(&format!(
                    "    left join {} {} {} on {}.{} = {}\n",
                    join.path,
                    arrow,
                    join.target,
                    if join.parent.is_empty() {
                        step.entity.as_str()
                    } else {
                        join.parent.as_str()
                    },
                    join.local_field,
                    join.foreign_field
                ));
            }
            let labels: Vec<&str> = step.columns.iter().map(|c| c.label.as_str()).collect();
            out.push_str(&format!("    columns: {}\n", labels.join(", ")));
            if let Some(filter) = &step.filter {
                out.push_str(&format!("    filter on: {}\n", filter.fields().join(", ")));
            }
            if !step.root_ids.is_empty() {
                out.push_str(&format!("    root ids: {}\n", step.root_ids.len()));
            }
            if !step.order_by.is_empty() {
                let order: Vec<String> = step
                    .order_by
                    .iter()
                    .map(|o| match o.direction {
                        OrderDirection::Asc => format!("{} asc", o.field),
                        OrderDirection::Desc => format!("{} desc", o.field),
                    })
                    .collect();
                out.push_str(&format!("    order by: {}\n", order.join(", ")));
            }
            if let Some(p) = &step.pagination {
                out.push_str(&format!("    limit {} offset {}\n", p.limit, p.offset));
            }
        }
        out
    }
}

/// Root ordering for a request: as requested, else identity ascending.
pub(crate) fn root_order(request: &ProjectionRequest, identity_field: &str) -> Vec<OrderSpec> {
    if request.order_by.is_empty() {
        vec![OrderSpec::asc(identity_field)]
    } else {
        request.order_by.clone()
    }
}
