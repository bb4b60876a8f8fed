//! shopgraph core - aggregate fetch planning and materialization.
//!
//! Given an entity graph and a projection request, the core decides how to
//! load the requested relations with a bounded number of round trips and
//! bounded row fan-out, runs the resulting steps against a backing store and
//! folds the rows into DTOs:
//!
//! - [`graph`] - Entity graph model (entity types, relations, cardinality)
//! - [`plan`] - Fetch plan selection and plan caching
//! - [`exec`] - Query execution against a [`QueryBackend`]
//! - [`assemble`] - Result assembly and join fan-out deduplication
//! - [`storage`] - sled-backed reference store
//! - [`shop`] - The online-shop domain used by the CLI and tests

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod assemble;
pub mod config;
pub mod error;
pub mod exec;
pub mod graph;
pub mod metrics;
pub mod plan;
pub mod projector;
pub mod shop;
pub mod storage;

pub use assemble::ResultAssembler;
pub use config::{ExecutorConfig, ProjectorConfig, RowBudget};
pub use error::{Error, PlanError, QueryExecutionError, SchemaError, StorageError};
pub use exec::{
    BackendError, CancelHandle, ExecutionResult, QueryBackend, QueryExecutor, RequestContext,
    ResultRow, RowSet,
};
pub use graph::{
    describe, Cardinality, EntityGraph, EntityType, FetchStrategy, RelationDescriptor, Schema,
    SchemaBuilder,
};
pub use metrics::{FetchMetrics, MetricsSnapshot};
pub use plan::{FetchPlan, FetchPlanSelector, FetchPolicy, PlanStrategy, QueryStep, StepKind};
pub use projector::Projector;
pub use storage::{SledBackend, StorageConfig};

/// Re-export protocol types.
pub use shopgraph_proto as proto;
