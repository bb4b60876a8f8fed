//! The projection facade.

use std::sync::Arc;
use std::time::Instant;

use shopgraph_proto::{AssembledDto, ProjectionRequest};
use tracing::debug;

use crate::assemble::ResultAssembler;
use crate::config::ProjectorConfig;
use crate::error::{Error, PlanError};
use crate::exec::{QueryBackend, QueryExecutor, RequestContext};
use crate::graph::EntityGraph;
use crate::metrics::FetchMetrics;
use crate::plan::{check_root_ids, FetchPlan, FetchPlanSelector, PlanCache, PlanFingerprint};

/// Plans, executes and assembles projection requests.
///
/// One projector serves many concurrent requests; the entity graph it is
/// handed is shared read-only state.
pub struct Projector {
    selector: FetchPlanSelector,
    executor: QueryExecutor,
    cache: Option<PlanCache>,
    metrics: Arc<FetchMetrics>,
}

impl Projector {
    /// Create a projector over a backing store.
    pub fn new(backend: Arc<dyn QueryBackend>, config: ProjectorConfig) -> Self {
        let cache = (config.plan_cache_entries > 0).then(|| PlanCache::new(config.plan_cache_entries));
        Self {
            selector: FetchPlanSelector::new(config.policy),
            executor: QueryExecutor::new(backend, config.executor),
            cache,
            metrics: Arc::new(FetchMetrics::new()),
        }
    }

    /// Share an existing metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<FetchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<FetchMetrics> {
        &self.metrics
    }

    /// The plan cache, if enabled.
    pub fn plan_cache(&self) -> Option<&PlanCache> {
        self.cache.as_ref()
    }

    /// Plan a request, reusing a cached plan of the same structure.
    pub fn plan(
        &self,
        graph: &EntityGraph,
        request: &ProjectionRequest,
    ) -> Result<FetchPlan, PlanError> {
        let Some(cache) = &self.cache else {
            return self.selector.select(graph, request);
        };

        if request.root != graph.root_name() {
            return Err(PlanError::RootMismatch {
                requested: request.root.clone(),
                graph: graph.root_name().to_string(),
            });
        }
        check_root_ids(request)?;
        let fingerprint = PlanFingerprint::new(request, self.selector.policy());
        let version = graph.schema().version();
        if let Some(plan) = cache.get(fingerprint, version, request) {
            self.metrics.record_cache_lookup(true);
            return Ok(plan);
        }
        self.metrics.record_cache_lookup(false);

        let plan = self.selector.select(graph, request)?;
        cache.insert(fingerprint, plan.clone());
        Ok(plan)
    }

    /// Describe the plan a request would run.
    pub fn explain(&self, graph: &EntityGraph, request: &ProjectionRequest) -> Result<String, Error> {
        Ok(self.plan(graph, request)?.explain())
    }

    /// Project a request into DTOs.
    ///
    /// Fails with [`Error::Plan`] when the request cannot be planned and with
    /// [`Error::Query`] when execution fails; no partial result is returned.
    pub async fn project(
        &self,
        graph: &EntityGraph,
        request: &ProjectionRequest,
        ctx: &RequestContext,
    ) -> Result<Vec<AssembledDto>, Error> {
        let started = Instant::now();
        self.metrics.record_request(&request.root);

        let plan = self.plan(graph, request).inspect_err(|err| {
            self.metrics.record_plan_error();
            debug!(root = %request.root, error = %err, "request rejected");
        })?;
        self.metrics.record_plan(plan.strategy);

        let executed = self
            .executor
            .execute(&plan, ctx)
            .await
            .and_then(|result| {
                let dtos = ResultAssembler::assemble(&plan, &result.row_sets)?;
                Ok((result, dtos))
            });
        let (result, dtos) = match executed {
            Ok(done) => done,
            Err(err) => {
                self.metrics.record_execution_error();
                return Err(err.into());
            }
        };

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.metrics.record_execution(
            result.round_trips as u64,
            result.rows() as u64,
            dtos.len() as u64,
            elapsed_us,
        );
        debug!(
            root = %plan.root,
            strategy = %plan.strategy,
            steps = plan.steps.len(),
            round_trips = result.round_trips,
            rows = result.rows(),
            dtos = dtos.len(),
            elapsed_us,
            "projection complete"
        );
        Ok(dtos)
    }
}
