//! Error taxonomy for the projection core.
//!
//! - [`SchemaError`]: the entity graph is inconsistent. Fatal at start-up.
//! - [`PlanError`]: the request cannot be planned. Client-side failure.
//! - [`QueryExecutionError`]: a round trip failed or timed out. Server-side.
//!
//! All three are terminal for the current request.

use thiserror::Error;

use crate::plan::StepId;

/// Entity graph inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// An entity type is declared twice.
    #[error("duplicate entity '{entity}'")]
    DuplicateEntity { entity: String },

    /// An entity type is not declared.
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    /// A relation points at an undeclared entity type.
    #[error("relation '{entity}.{relation}' targets unknown entity '{target}'")]
    UnknownTarget {
        entity: String,
        relation: String,
        target: String,
    },

    /// A relation name is declared twice on the same owner.
    #[error("duplicate relation '{entity}.{relation}'")]
    DuplicateRelation { entity: String, relation: String },

    /// A join key references an undeclared field.
    #[error("relation '{relation}' references unknown field '{entity}.{field}'")]
    UnknownJoinField {
        relation: String,
        entity: String,
        field: String,
    },

    /// Owned relations form a cycle without a back-reference.
    #[error("relation cycle without back-reference: {cycle}")]
    Cycle { cycle: String },

    /// A relation path segment does not resolve.
    #[error("unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },
}

/// A projection request cannot be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The request targets a different root than the graph.
    #[error("request root '{requested}' does not match graph root '{graph}'")]
    RootMismatch { requested: String, graph: String },

    /// A requested relation path does not exist.
    #[error("unknown relation path '{path}': {source}")]
    UnknownPath {
        path: String,
        #[source]
        source: SchemaError,
    },

    /// A requested field does not exist.
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// A back-reference cannot be expanded into a nested DTO.
    #[error("relation path '{path}' crosses a back-reference and cannot be nested")]
    BackReference { path: String },

    /// A relation path is nested deeper than allowed.
    #[error("relation path '{path}' has depth {depth}, maximum is {max}")]
    DepthExceeded { path: String, depth: usize, max: usize },

    /// More independent to-many relations than the policy allows.
    #[error("{count} independent collections requested ({paths}), at most {max} allowed")]
    IndependentCollections {
        count: usize,
        paths: String,
        max: usize,
    },

    /// Estimated row fan-out exceeds the ceiling.
    #[error("estimated fan-out {estimated} of '{path}' exceeds ceiling {ceiling}")]
    FanOutCeiling {
        path: String,
        estimated: u64,
        ceiling: u64,
    },

    /// A flat projection with no columns.
    #[error("flat projection selects no columns")]
    EmptyProjection,

    /// A root identifier cannot serve as an identity.
    #[error("root id at position {position} is not an identity value")]
    InvalidRootId { position: usize },
}

/// A backing-store round trip failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryExecutionError {
    /// The backing store reported a failure.
    #[error("step {step} batch {batch} failed: {message}")]
    Backend {
        step: StepId,
        batch: usize,
        message: String,
    },

    /// The request deadline passed before the step completed.
    #[error("step {step} timed out")]
    Timeout { step: StepId },

    /// The caller cancelled the request.
    #[error("step {step} cancelled")]
    Cancelled { step: StepId },

    /// A step returned more rows than allowed.
    #[error("step {step} returned {rows} rows, exceeding budget of {limit}")]
    RowLimit {
        step: StepId,
        rows: usize,
        limit: usize,
    },

    /// A plan would need more round trips than allowed.
    #[error("plan needs {round_trips} round trips, exceeding budget of {limit}")]
    RoundTripLimit { round_trips: usize, limit: usize },

    /// A worker task died.
    #[error("step {step} worker failed: {message}")]
    Worker { step: StepId, message: String },

    /// Rows do not match the plan.
    #[error("step {step} returned inconsistent rows: {detail}")]
    Inconsistent { step: StepId, detail: String },
}

/// Errors raised by the sled-backed reference store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying sled error.
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    /// Record encoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record decoding failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A step cannot be run against the store.
    #[error("invalid step: {0}")]
    InvalidStep(String),

    /// The entity type is not part of the schema.
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    /// An inserted entity lacks a usable identity value.
    #[error("entity '{entity}' has no identity value in field '{field}'")]
    MissingIdentity { entity: String, field: String },
}

/// Top-level error returned by a projection.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity graph inconsistency.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Request could not be planned.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Query execution failed.
    #[error(transparent)]
    Query(#[from] QueryExecutionError),

    /// Reference store failure outside of a plan.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    /// Check whether the caller is at fault (bad-request class).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Plan(_))
    }
}
