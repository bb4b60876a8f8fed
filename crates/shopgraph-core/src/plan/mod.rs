//! Fetch plan selection.
//!
//! A [`FetchPlan`] is an ordered list of [`QueryStep`]s, each a single round
//! trip to the backing store, plus the shape the assembler builds from the
//! rows. [`FetchPlanSelector`] derives plans from an entity graph and a
//! projection request; [`PlanCache`] reuses them across requests of the same
//! structure.

mod cache;
mod policy;
mod selector;
mod step;

pub use cache::{CacheStats, PlanCache, PlanFingerprint};
pub use policy::FetchPolicy;
pub use selector::{check_root_ids, FetchPlanSelector};
pub use step::{
    AssemblyShape, ColumnRef, FetchPlan, JoinSpec, PathShape, PlanStrategy, QueryStep, StepId,
    StepKind,
};
