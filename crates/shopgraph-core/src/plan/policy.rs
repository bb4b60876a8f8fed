//! Fetch policy: the tunables the selector plans against.

use serde::{Deserialize, Serialize};

/// Limits and tunables for fetch plan selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    /// Root ids per round trip for batched collection steps.
    pub batch_size: usize,
    /// Maximum estimated rows per root in a single step.
    pub max_fan_out: u64,
    /// Maximum independent to-many groups per plan.
    pub max_collection_steps: usize,
    /// Maximum relation path depth.
    pub max_depth: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_fan_out: 1_000,
            max_collection_steps: 1,
            max_depth: 5,
        }
    }
}

impl FetchPolicy {
    /// Set the collection batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the fan-out ceiling.
    pub fn with_max_fan_out(mut self, max_fan_out: u64) -> Self {
        self.max_fan_out = max_fan_out;
        self
    }

    /// Set the maximum number of independent collection steps.
    pub fn with_max_collection_steps(mut self, max: usize) -> Self {
        self.max_collection_steps = max;
        self
    }

    /// Set the maximum relation path depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}
