//! shopgraph protocol types.
//!
//! This crate defines what callers hand to the projection core and what they
//! get back:
//!
//! - [`value`] - Runtime values for filters, rows and DTO fields
//! - [`query`] - Projection request IR (root filter + response shape)
//! - [`result`] - Assembled DTO trees and flat rows
//! - [`error`] - Protocol error types
//!
//! Requests and DTOs travel as JSON through `serde`. Only [`Value`] derives
//! `rkyv`, for the stored entity encoding.

pub mod error;
pub mod query;
pub mod result;
pub mod value;

pub use error::Error;

pub use query::{
    ColumnSelect, FilterExpr, OrderDirection, OrderSpec, Pagination, ProjectionRequest,
    RelationInclude, Shape, SimpleFilter,
};
pub use result::{AssembledDto, EntityDto, FlatDto, RelationDto, RelationValue};
pub use value::{IdentityKey, Value};

/// Parse a projection request from JSON.
pub fn request_from_json(json: &str) -> Result<ProjectionRequest, Error> {
    let request: ProjectionRequest = serde_json::from_str(json)?;
    if request.root.is_empty() {
        return Err(Error::InvalidRequest("root entity must not be empty".into()));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_keeps_filter_and_shape() {
        let request = ProjectionRequest::graph("Order")
            .include(RelationInclude::new("member"))
            .include(RelationInclude::new("orderItems.item"))
            .with_filter(FilterExpr::eq("status", "ORDER"))
            .with_root_ids(vec![Value::Int64(4), Value::Int64(11)])
            .with_order(OrderSpec::asc("orderDate"))
            .with_pagination(Pagination::limit(10));

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("orderItems.item"));
        assert_eq!(request_from_json(&json).unwrap(), request);
    }

    #[test]
    fn test_request_from_json_rejects_empty_root() {
        let err = request_from_json(r#"{"root": "", "shape": {"kind": "graph"}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let ok = request_from_json(r#"{"root": "Member", "shape": {"kind": "graph"}}"#).unwrap();
        assert_eq!(ok, ProjectionRequest::graph("Member"));
    }
}
