//! Projection request IR.
//!
//! A [`ProjectionRequest`] names a root entity, a root filter and the shape of
//! the response: either a nested graph of DTOs ([`Shape::Graph`]) or a flat
//! column list ([`Shape::Flat`]). Relation paths use dot notation
//! (e.g. `"orderItems.item"`).

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A request to project an aggregate into DTOs.
///
/// Built once per incoming call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRequest {
    /// Root entity type.
    pub root: String,
    /// Optional filter over root entity fields.
    #[serde(default)]
    pub filter: Option<FilterExpr>,
    /// Optional explicit set of root identifiers.
    #[serde(default)]
    pub root_ids: Vec<Value>,
    /// Root ordering. Empty means identity ascending.
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Root pagination.
    #[serde(default)]
    pub pagination: Option<Pagination>,
    /// Requested response shape.
    pub shape: Shape,
}

/// Response shape of a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    /// Nested entity DTOs.
    Graph {
        /// Root fields to include (empty = all fields).
        #[serde(default)]
        fields: Vec<String>,
        /// Relation paths to include.
        #[serde(default)]
        includes: Vec<RelationInclude>,
    },
    /// Flat rows of exactly the selected columns.
    Flat {
        /// Selected columns.
        columns: Vec<ColumnSelect>,
    },
}

/// An included relation path in a graph shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationInclude {
    /// Dot-separated path to this relation (e.g. `"orderItems.item"`).
    pub path: String,
    /// Fields to select from the related entity (empty = all fields).
    #[serde(default)]
    pub fields: Vec<String>,
}

/// A column in a flat projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSelect {
    /// Relation path owning the field (`""` for the root entity).
    #[serde(default)]
    pub path: String,
    /// Field name on the entity at `path`.
    pub field: String,
    /// Output label. Defaults to `path.field` (or `field` on the root).
    #[serde(default)]
    pub alias: Option<String>,
}

impl ProjectionRequest {
    /// Create a graph-shaped request selecting all root fields.
    pub fn graph(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            filter: None,
            root_ids: vec![],
            order_by: vec![],
            pagination: None,
            shape: Shape::Graph {
                fields: vec![],
                includes: vec![],
            },
        }
    }

    /// Create a flat request with no columns yet.
    pub fn flat(root: impl Into<String>) -> Self {
        Self {
            shape: Shape::Flat { columns: vec![] },
            ..Self::graph(root)
        }
    }

    /// Restrict the root fields of a graph shape.
    pub fn with_fields(mut self, new_fields: Vec<String>) -> Self {
        if let Shape::Graph { fields, .. } = &mut self.shape {
            *fields = new_fields;
        }
        self
    }

    /// Add a relation include to a graph shape.
    pub fn include(mut self, include: RelationInclude) -> Self {
        if let Shape::Graph { includes, .. } = &mut self.shape {
            includes.push(include);
        }
        self
    }

    /// Add a column to a flat shape.
    pub fn column(mut self, column: ColumnSelect) -> Self {
        if let Shape::Flat { columns } = &mut self.shape {
            columns.push(column);
        }
        self
    }

    /// Set the root filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Restrict the request to an explicit set of root identifiers.
    pub fn with_root_ids(mut self, ids: Vec<Value>) -> Self {
        self.root_ids = ids;
        self
    }

    /// Add root ordering.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set root pagination.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Check whether the response is a flat projection.
    pub fn is_flat(&self) -> bool {
        matches!(self.shape, Shape::Flat { .. })
    }
}

impl RelationInclude {
    /// Create an include for a relation path, selecting all fields.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fields: vec![],
        }
    }

    /// Set the fields to select.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Get the relation name (last segment of the path).
    pub fn relation_name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Get the parent path (all segments except the last).
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Get the depth of this include (number of dots + 1).
    pub fn depth(&self) -> usize {
        self.path.matches('.').count() + 1
    }
}

impl ColumnSelect {
    /// Select a field of the root entity.
    pub fn root(field: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            field: field.into(),
            alias: None,
        }
    }

    /// Select a field reached through a relation path.
    pub fn at(path: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            field: field.into(),
            alias: None,
        }
    }

    /// Set the output label.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output label of this column.
    pub fn label(&self) -> String {
        match (&self.alias, self.path.is_empty()) {
            (Some(alias), _) => alias.clone(),
            (None, true) => self.field.clone(),
            (None, false) => format!("{}.{}", self.path, self.field),
        }
    }
}

/// Filter expression over root entity fields.
///
/// Flat design: And/Or hold [`SimpleFilter`]s rather than nested expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Le { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field is not null.
    IsNotNull { field: String },
    /// Field matches a LIKE pattern.
    Like { field: String, pattern: String },
    /// All conditions must be true.
    And(Vec<SimpleFilter>),
    /// At least one condition must be true.
    Or(Vec<SimpleFilter>),
}

/// A non-compound filter for use in And/Or expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleFilter {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field matches a LIKE pattern.
    Like { field: String, pattern: String },
}

impl FilterExpr {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN filter.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values,
        }
    }

    /// Create a LIKE filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        FilterExpr::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Create an AND filter combining simple expressions.
    pub fn and(exprs: Vec<SimpleFilter>) -> Self {
        FilterExpr::And(exprs)
    }

    /// Create an OR filter combining simple expressions.
    pub fn or(exprs: Vec<SimpleFilter>) -> Self {
        FilterExpr::Or(exprs)
    }

    /// Field names referenced by this expression.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            FilterExpr::Eq { field, .. }
            | FilterExpr::Ne { field, .. }
            | FilterExpr::Lt { field, .. }
            | FilterExpr::Le { field, .. }
            | FilterExpr::Gt { field, .. }
            | FilterExpr::Ge { field, .. }
            | FilterExpr::In { field, .. }
            | FilterExpr::IsNull { field }
            | FilterExpr::IsNotNull { field }
            | FilterExpr::Like { field, .. } => vec![field.as_str()],
            FilterExpr::And(filters) | FilterExpr::Or(filters) => {
                filters.iter().map(SimpleFilter::field).collect()
            }
        }
    }
}

impl SimpleFilter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        SimpleFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a LIKE filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        SimpleFilter::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Field name referenced by this filter.
    pub fn field(&self) -> &str {
        match self {
            SimpleFilter::Eq { field, .. }
            | SimpleFilter::Ne { field, .. }
            | SimpleFilter::Lt { field, .. }
            | SimpleFilter::Gt { field, .. }
            | SimpleFilter::In { field, .. }
            | SimpleFilter::IsNull { field }
            | SimpleFilter::Like { field, .. } => field,
        }
    }
}

/// Order specification for sorting roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Field to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Offset/limit pagination over root entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of roots to return.
    pub limit: u32,
    /// Number of roots to skip.
    #[serde(default)]
    pub offset: u32,
}

impl Pagination {
    /// Create pagination with limit and offset.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Create pagination with just a limit.
    pub fn limit(limit: u32) -> Self {
        Self { limit, offset: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_request_builder() {
        let request = ProjectionRequest::graph("Order")
            .include(RelationInclude::new("member").with_fields(vec!["name".into()]))
            .include(RelationInclude::new("orderItems.item"))
            .with_filter(FilterExpr::eq("status", "ORDER"))
            .with_order(OrderSpec::desc("orderDate"))
            .with_pagination(Pagination::new(10, 20));

        assert!(!request.is_flat());
        match &request.shape {
            Shape::Graph { includes, .. } => {
                assert_eq!(includes.len(), 2);
                assert_eq!(includes[1].relation_name(), "item");
                assert_eq!(includes[1].parent_path(), Some("orderItems"));
                assert_eq!(includes[1].depth(), 2);
            }
            Shape::Flat { .. } => panic!("expected graph shape"),
        }
    }

    #[test]
    fn test_column_builders_ignore_wrong_shape() {
        let request = ProjectionRequest::graph("Order").column(ColumnSelect::root("id"));
        assert_eq!(
            request.shape,
            Shape::Graph {
                fields: vec![],
                includes: vec![]
            }
        );

        let flat = ProjectionRequest::flat("Order").include(RelationInclude::new("member"));
        assert_eq!(flat.shape, Shape::Flat { columns: vec![] });
    }

    #[test]
    fn test_column_labels() {
        assert_eq!(ColumnSelect::root("id").label(), "id");
        assert_eq!(ColumnSelect::at("member", "name").label(), "member.name");
        assert_eq!(
            ColumnSelect::at("member", "name").alias("memberName").label(),
            "memberName"
        );
    }

    #[test]
    fn test_filter_fields() {
        let filter = FilterExpr::and(vec![
            SimpleFilter::eq("status", "ORDER"),
            SimpleFilter::like("memo", "%gift%"),
        ]);
        assert_eq!(filter.fields(), vec!["status", "memo"]);
        assert_eq!(FilterExpr::ge("id", 3i64).fields(), vec!["id"]);
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "root": "Order",
            "filter": {"eq": {"field": "status", "value": "ORDER"}},
            "shape": {
                "kind": "flat",
                "columns": [
                    {"field": "id", "alias": "orderId"},
                    {"path": "member", "field": "name", "alias": "memberName"}
                ]
            }
        }"#;

        let request: ProjectionRequest = serde_json::from_str(json).unwrap();
        assert!(request.is_flat());
        assert!(request.root_ids.is_empty());
        assert_eq!(request.filter, Some(FilterExpr::eq("status", "ORDER")));
        match request.shape {
            Shape::Flat { columns } => {
                assert_eq!(columns[0].label(), "orderId");
                assert_eq!(columns[1].path, "member");
            }
            Shape::Graph { .. } => panic!("expected flat shape"),
        }
    }
}
