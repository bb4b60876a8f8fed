//! Query execution.
//!
//! The executor consumes a [`QueryBackend`] (one round trip per call) and a
//! [`RequestContext`] (deadline and cancellation) and turns a fetch plan into
//! one [`RowSet`] per step.

mod backend;
mod context;
mod executor;

pub use backend::{BackendError, QueryBackend, ResultRow, RowSet};
pub use context::{CancelHandle, RequestContext};
pub use executor::{ExecutionResult, QueryExecutor};
