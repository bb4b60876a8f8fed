//! Backing-store capability consumed by the executor.

use async_trait::async_trait;
use shopgraph_proto::{IdentityKey, Value};
use thiserror::Error;

use crate::plan::{QueryStep, StepId};

/// One raw result tuple: a value per column of the step that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    /// Column values in step column order.
    pub values: Vec<Value>,
}

impl ResultRow {
    /// Create a row.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get a column value.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.values.len()
    }

    /// Identity key of the value at `index`, if it is usable as an identity.
    pub fn identity_at(&self, index: usize) -> Option<IdentityKey> {
        self.get(index).and_then(Value::identity_key)
    }
}

/// All rows returned for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    /// Step that produced the rows.
    pub step: StepId,
    /// Rows in backend order, batches concatenated in batch order.
    pub rows: Vec<ResultRow>,
}

impl RowSet {
    /// Create a row set.
    pub fn new(step: StepId, rows: Vec<ResultRow>) -> Self {
        Self { step, rows }
    }

    /// A row set for a step that was skipped.
    pub fn empty(step: StepId) -> Self {
        Self { step, rows: vec![] }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Failure reported by a backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    /// Create a backend error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A store able to run one query step per call.
///
/// Implementations must honor the step's joins (left-outer), column list,
/// root filter, ordering and pagination. When `root_ids` is given, only roots
/// with those identities are scanned, in the order given.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run one round trip.
    async fn run(&self, step: &QueryStep, root_ids: Option<&[Value]>)
        -> Result<RowSet, BackendError>;
}
