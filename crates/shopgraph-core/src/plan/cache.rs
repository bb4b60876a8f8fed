//! Plan cache.
//!
//! Plans depend on the structure of a request, not on its literal values, so
//! requests that differ only in filter values, root ids or page bounds share
//! one cached plan. A cached plan is re-bound to the incoming request before
//! use.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use shopgraph_proto::{FilterExpr, ProjectionRequest, Shape, SimpleFilter};

use super::policy::FetchPolicy;
use super::step::FetchPlan;

/// Structural fingerprint of a request under a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanFingerprint(u64);

impl PlanFingerprint {
    /// Fingerprint a request.
    ///
    /// Covers the root, the full shape, filter operators and fields, the
    /// ordering, whether pagination or root ids are present, and the policy.
    pub fn new(request: &ProjectionRequest, policy: &FetchPolicy) -> Self {
        let mut hasher = DefaultHasher::new();

        request.root.hash(&mut hasher);
        match &request.shape {
            Shape::Graph { fields, includes } => {
                0u8.hash(&mut hasher);
                fields.hash(&mut hasher);
                for include in includes {
                    include.path.hash(&mut hasher);
                    include.fields.hash(&mut hasher);
                }
            }
            Shape::Flat { columns } => {
                1u8.hash(&mut hasher);
                for column in columns {
                    column.path.hash(&mut hasher);
                    column.field.hash(&mut hasher);
                    column.alias.hash(&mut hasher);
                }
            }
        }

        request.filter.is_some().hash(&mut hasher);
        if let Some(filter) = &request.filter {
            hash_filter_structure(filter, &mut hasher);
        }
        for order in &request.order_by {
            order.field.hash(&mut hasher);
            std::mem::discriminant(&order.direction).hash(&mut hasher);
        }
        request.pagination.is_some().hash(&mut hasher);
        request.root_ids.is_empty().hash(&mut hasher);
        policy.hash(&mut hasher);

        Self(hasher.finish())
    }
}

fn hash_filter_structure<H: Hasher>(filter: &FilterExpr, hasher: &mut H) {
    std::mem::discriminant(filter).hash(hasher);
    match filter {
        FilterExpr::And(filters) | FilterExpr::Or(filters) => {
            filters.len().hash(hasher);
            for f in filters {
                std::mem::discriminant(f).hash(hasher);
                f.field().hash(hasher);
                if let SimpleFilter::In { values, .. } = f {
                    values.len().hash(hasher);
                }
            }
        }
        FilterExpr::In { field, values } => {
            field.hash(hasher);
            values.len().hash(hasher);
        }
        other => {
            for field in other.fields() {
                field.hash(hasher);
            }
        }
    }
}

/// A cached plan with its hit counter.
#[derive(Debug)]
struct CachedPlan {
    plan: FetchPlan,
    hits: AtomicU64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found no valid plan.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries dropped to stay within capacity.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// Bounded, thread-safe cache of fetch plans.
///
/// Plans built against another schema version are treated as misses.
#[derive(Debug)]
pub struct PlanCache {
    entries: DashMap<PlanFingerprint, CachedPlan>,
    max_entries: usize,
    stats: CacheStats,
}

impl PlanCache {
    /// Create a cache holding at most `max_entries` plans.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Get a plan for a request, re-bound to the request's literal values.
    pub fn get(
        &self,
        fingerprint: PlanFingerprint,
        schema_version: u64,
        request: &ProjectionRequest,
    ) -> Option<FetchPlan> {
        if let Some(cached) = self.entries.get(&fingerprint) {
            if cached.plan.schema_version == schema_version {
                cached.hits.fetch_add(1, Ordering::Relaxed);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(cached.plan.rebind(request));
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a plan, evicting the least-hit entry when full.
    pub fn insert(&self, fingerprint: PlanFingerprint, plan: FetchPlan) {
        if self.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&fingerprint) {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| e.value().hits.load(Ordering::Relaxed))
                .map(|e| *e.key());
            if let Some(key) = victim {
                self.entries.remove(&key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.entries.insert(
            fingerprint,
            CachedPlan {
                plan,
                hits: AtomicU64::new(0),
            },
        );
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::describe;
    use crate::plan::FetchPlanSelector;
    use crate::shop;
    use shopgraph_proto::{Pagination, Value};

    fn fp(request: &ProjectionRequest) -> PlanFingerprint {
        PlanFingerprint::new(request, &FetchPolicy::default())
    }

    #[test]
    fn test_fingerprint_ignores_literals() {
        let a = shop::orders().with_filter(FilterExpr::eq("status", "ORDER"));
        let b = shop::orders().with_filter(FilterExpr::eq("status", "CANCEL"));
        assert_eq!(fp(&a), fp(&b));

        let a = shop::orders().with_pagination(Pagination::new(10, 0));
        let b = shop::orders().with_pagination(Pagination::new(5, 20));
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn test_fingerprint_tracks_structure() {
        assert_ne!(fp(&shop::orders()), fp(&shop::simple_orders()));
        assert_ne!(
            fp(&shop::orders()),
            fp(&shop::orders().with_pagination(Pagination::limit(1)))
        );
        assert_ne!(
            fp(&shop::orders()),
            PlanFingerprint::new(&shop::orders(), &FetchPolicy::default().with_batch_size(7))
        );
    }

    #[test]
    fn test_get_rebinds_literals() {
        let graph = describe(shop::schema().unwrap(), "Order").unwrap();
        let cache = PlanCache::new(4);
        let first = shop::orders().with_root_ids(vec![Value::Int64(1)]);
        let plan = FetchPlanSelector::default().select(&graph, &first).unwrap();
        cache.insert(fp(&first), plan);

        let second = shop::orders().with_root_ids(vec![Value::Int64(2)]);
        let cached = cache.get(fp(&second), 1, &second).unwrap();
        assert_eq!(cached.steps[0].root_ids, vec![Value::Int64(2)]);
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_schema_version_mismatch_is_miss() {
        let graph = describe(shop::schema().unwrap(), "Order").unwrap();
        let cache = PlanCache::new(4);
        let request = shop::simple_orders();
        let plan = FetchPlanSelector::default().select(&graph, &request).unwrap();
        cache.insert(fp(&request), plan);

        assert!(cache.get(fp(&request), 2, &request).is_none());
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_eviction_of_least_hit() {
        let graph = describe(shop::schema().unwrap(), "Order").unwrap();
        let selector = FetchPlanSelector::default();
        let cache = PlanCache::new(2);

        let a = shop::simple_orders();
        let b = shop::orders();
        let c = shop::order_flat();
        cache.insert(fp(&a), selector.select(&graph, &a).unwrap());
        cache.insert(fp(&b), selector.select(&graph, &b).unwrap());
        assert!(cache.get(fp(&a), 1, &a).is_some());

        cache.insert(fp(&c), selector.select(&graph, &c).unwrap());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);
        assert!(cache.get(fp(&a), 1, &a).is_some());
        assert!(cache.get(fp(&b), 1, &b).is_none());
    }
}
