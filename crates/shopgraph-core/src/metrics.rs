//! Fetch metrics.
//!
//! Counters describing how requests were planned and executed. Cheap to
//! update from concurrent requests; [`FetchMetrics::snapshot`] returns a
//! serializable copy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::plan::PlanStrategy;

/// Registry of fetch counters.
pub struct FetchMetrics {
    started_at: Instant,

    requests: AtomicU64,
    requests_by_root: RwLock<BTreeMap<String, u64>>,

    // Plans
    single_step_plans: AtomicU64,
    join_fetch_plans: AtomicU64,
    batched_plans: AtomicU64,
    direct_projection_plans: AtomicU64,
    plan_cache_hits: AtomicU64,
    plan_cache_misses: AtomicU64,

    // Execution
    round_trips: AtomicU64,
    rows_fetched: AtomicU64,
    dtos_assembled: AtomicU64,
    total_latency_us: AtomicU64,

    // Failures
    plan_errors: AtomicU64,
    execution_errors: AtomicU64,
}

/// Point-in-time copy of [`FetchMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub requests_by_root: BTreeMap<String, u64>,
    pub single_step_plans: u64,
    pub join_fetch_plans: u64,
    pub batched_plans: u64,
    pub direct_projection_plans: u64,
    pub plan_cache_hits: u64,
    pub plan_cache_misses: u64,
    pub round_trips: u64,
    pub rows_fetched: u64,
    pub dtos_assembled: u64,
    pub avg_latency_us: u64,
    pub plan_errors: u64,
    pub execution_errors: u64,
}

impl Default for FetchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchMetrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests: AtomicU64::new(0),
            requests_by_root: RwLock::new(BTreeMap::new()),
            single_step_plans: AtomicU64::new(0),
            join_fetch_plans: AtomicU64::new(0),
            batched_plans: AtomicU64::new(0),
            direct_projection_plans: AtomicU64::new(0),
            plan_cache_hits: AtomicU64::new(0),
            plan_cache_misses: AtomicU64::new(0),
            round_trips: AtomicU64::new(0),
            rows_fetched: AtomicU64::new(0),
            dtos_assembled: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            plan_errors: AtomicU64::new(0),
            execution_errors: AtomicU64::new(0),
        }
    }

    /// Record an incoming request.
    pub fn record_request(&self, root: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        *self.requests_by_root.write().entry(root.to_string()).or_insert(0) += 1;
    }

    /// Record the strategy of a plan about to run.
    pub fn record_plan(&self, strategy: PlanStrategy) {
        let counter = match strategy {
            PlanStrategy::SingleStep => &self.single_step_plans,
            PlanStrategy::JoinFetch => &self.join_fetch_plans,
            PlanStrategy::BatchedCollections => &self.batched_plans,
            PlanStrategy::DirectProjection => &self.direct_projection_plans,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a plan cache lookup.
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.plan_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.plan_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a completed request.
    pub fn record_execution(&self, round_trips: u64, rows: u64, dtos: u64, latency_us: u64) {
        self.round_trips.fetch_add(round_trips, Ordering::Relaxed);
        self.rows_fetched.fetch_add(rows, Ordering::Relaxed);
        self.dtos_assembled.fetch_add(dtos, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record a request rejected by the selector.
    pub fn record_plan_error(&self) {
        self.plan_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that failed during execution or assembly.
    pub fn record_execution_error(&self) {
        self.execution_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Total round trips issued.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let completed = requests
            .saturating_sub(self.plan_errors.load(Ordering::Relaxed))
            .saturating_sub(self.execution_errors.load(Ordering::Relaxed));
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            requests,
            requests_by_root: self.requests_by_root.read().clone(),
            single_step_plans: self.single_step_plans.load(Ordering::Relaxed),
            join_fetch_plans: self.join_fetch_plans.load(Ordering::Relaxed),
            batched_plans: self.batched_plans.load(Ordering::Relaxed),
            direct_projection_plans: self.direct_projection_plans.load(Ordering::Relaxed),
            plan_cache_hits: self.plan_cache_hits.load(Ordering::Relaxed),
            plan_cache_misses: self.plan_cache_misses.load(Ordering::Relaxed),
            round_trips: self.round_trips.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
            dtos_assembled: self.dtos_assembled.load(Ordering::Relaxed),
            avg_latency_us: if completed > 0 {
                total_latency / completed
            } else {
                0
            },
            plan_errors: self.plan_errors.load(Ordering::Relaxed),
            execution_errors: self.execution_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = FetchMetrics::new();
        metrics.record_request("Order");
        metrics.record_request("Order");
        metrics.record_request("Member");
        metrics.record_plan(PlanStrategy::BatchedCollections);
        metrics.record_plan(PlanStrategy::DirectProjection);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(true);
        metrics.record_execution(2, 6, 2, 300);
        metrics.record_execution(1, 2, 2, 100);
        metrics.record_plan_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.requests_by_root.get("Order"), Some(&2));
        assert_eq!(snapshot.batched_plans, 1);
        assert_eq!(snapshot.direct_projection_plans, 1);
        assert_eq!(snapshot.plan_cache_hits, 1);
        assert_eq!(snapshot.plan_cache_misses, 1);
        assert_eq!(snapshot.round_trips, 3);
        assert_eq!(snapshot.rows_fetched, 8);
        assert_eq!(snapshot.avg_latency_us, 200);
        assert_eq!(snapshot.plan_errors, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(FetchMetrics::new().snapshot()).unwrap();
        assert_eq!(json["requests"], 0);
        assert!(json["requests_by_root"].as_object().unwrap().is_empty());
    }
}
