//! Projector configuration.
//!
//! All fields have defaults, so a JSON file only needs the values it
//! overrides:
//!
//! ```json
//! { "policy": { "batch_size": 50 }, "executor": { "default_timeout_ms": 5000 } }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::FetchPolicy;

/// Row and round-trip limits enforced during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowBudget {
    /// Maximum rows a single step may return (all batches combined).
    pub max_rows_per_step: usize,
    /// Maximum round trips per request.
    pub max_round_trips: usize,
}

impl Default for RowBudget {
    fn default() -> Self {
        Self {
            max_rows_per_step: 50_000,
            max_round_trips: 1_000,
        }
    }
}

/// Query executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum round trips in flight at once.
    pub max_concurrent_steps: usize,
    /// Timeout applied when the request carries no deadline.
    pub default_timeout_ms: u64,
    /// Row and round-trip limits.
    pub budget: RowBudget,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 4,
            default_timeout_ms: 30_000,
            budget: RowBudget::default(),
        }
    }
}

impl ExecutorConfig {
    /// Set the concurrency limit. Zero is treated as one.
    pub fn with_max_concurrent_steps(mut self, max: usize) -> Self {
        self.max_concurrent_steps = max.max(1);
        self
    }

    /// Set the default timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the row budget.
    pub fn with_budget(mut self, budget: RowBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Default timeout as a duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Top-level configuration for a [`Projector`](crate::Projector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Fetch plan selection policy.
    pub policy: FetchPolicy,
    /// Executor settings.
    pub executor: ExecutorConfig,
    /// Plan cache capacity; zero disables caching.
    pub plan_cache_entries: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            policy: FetchPolicy::default(),
            executor: ExecutorConfig::default(),
            plan_cache_entries: 256,
        }
    }
}

impl ProjectorConfig {
    /// Set the fetch policy.
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the executor settings.
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Set the plan cache capacity.
    pub fn with_plan_cache_entries(mut self, entries: usize) -> Self {
        self.plan_cache_entries = entries;
        self
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
