//! Query executor.
//!
//! Runs the steps of a [`FetchPlan`] in dependency order. Steps whose
//! dependencies are satisfied form a wave; the round trips of a wave run
//! concurrently on a [`JoinSet`], bounded by a semaphore shared by every
//! request using the executor. A dependent step is split into batches of its
//! `batch_size` root ids, so loading a collection for `n` roots costs
//! `ceil(n / batch_size)` round trips.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use shopgraph_proto::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backend::{BackendError, QueryBackend, RowSet};
use super::context::RequestContext;
use crate::config::ExecutorConfig;
use crate::error::QueryExecutionError;
use crate::plan::{FetchPlan, QueryStep, StepId};

/// Rows produced by executing a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// One row set per step, in step order.
    pub row_sets: Vec<RowSet>,
    /// Round trips issued.
    pub round_trips: usize,
}

impl ExecutionResult {
    /// Total rows across all steps.
    pub fn rows(&self) -> usize {
        self.row_sets.iter().map(RowSet::len).sum()
    }
}

/// One round trip to issue.
struct Task {
    step: StepId,
    batch: usize,
    root_ids: Option<Vec<Value>>,
}

type TaskOutput = (StepId, usize, u64, Result<RowSet, BackendError>);

/// Executes fetch plans against a [`QueryBackend`].
pub struct QueryExecutor {
    backend: Arc<dyn QueryBackend>,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
}

impl QueryExecutor {
    /// Create an executor.
    pub fn new(backend: Arc<dyn QueryBackend>, config: ExecutorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_steps.max(1)));
        Self {
            backend,
            config,
            permits,
        }
    }

    /// The executor settings.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a plan, returning one row set per step.
    ///
    /// Any failed round trip, timeout or cancellation aborts the remaining
    /// work and drops all rows fetched so far.
    pub async fn execute(
        &self,
        plan: &FetchPlan,
        ctx: &RequestContext,
    ) -> Result<ExecutionResult, QueryExecutionError> {
        let deadline = ctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + self.config.default_timeout());

        let mut done: Vec<Option<RowSet>> = plan.steps.iter().map(|_| None).collect();
        let mut pending: BTreeSet<StepId> = plan.steps.iter().map(|s| s.id).collect();
        let mut round_trips = 0usize;

        while let Some(&first) = pending.iter().next() {
            let ready: Vec<StepId> = pending
                .iter()
                .copied()
                .filter(|&id| match plan.steps[id].depends_on {
                    None => true,
                    Some(dep) => done.get(dep).is_some_and(Option::is_some),
                })
                .collect();
            if ready.is_empty() {
                return Err(QueryExecutionError::Inconsistent {
                    step: first,
                    detail: "dependency never completes".into(),
                });
            }

            let mut tasks = Vec::new();
            for &id in &ready {
                pending.remove(&id);
                let step = &plan.steps[id];
                let Some(dep) = step.depends_on else {
                    tasks.push(Task {
                        step: id,
                        batch: 0,
                        root_ids: None,
                    });
                    continue;
                };

                let ids = match &done[dep] {
                    Some(rows) => root_ids(&plan.steps[dep], rows)?,
                    None => Vec::new(),
                };
                if ids.is_empty() {
                    debug!(step = id, "no root ids, skipping dependent step");
                    done[id] = Some(RowSet::empty(id));
                    continue;
                }
                for (batch, chunk) in ids.chunks(step.batch_size.max(1)).enumerate() {
                    tasks.push(Task {
                        step: id,
                        batch,
                        root_ids: Some(chunk.to_vec()),
                    });
                }
            }

            round_trips += tasks.len();
            if round_trips > self.config.budget.max_round_trips {
                return Err(QueryExecutionError::RoundTripLimit {
                    round_trips,
                    limit: self.config.budget.max_round_trips,
                });
            }

            for (id, rows) in self.run_wave(plan, tasks, deadline, ctx).await? {
                done[id] = Some(rows);
            }
        }

        let mut row_sets = Vec::with_capacity(done.len());
        for (id, rows) in done.into_iter().enumerate() {
            row_sets.push(rows.unwrap_or_else(|| RowSet::empty(id)));
        }
        Ok(ExecutionResult {
            row_sets,
            round_trips,
        })
    }

    /// Run a set of round trips concurrently and merge them per step.
    async fn run_wave(
        &self,
        plan: &FetchPlan,
        tasks: Vec<Task>,
        deadline: Instant,
        ctx: &RequestContext,
    ) -> Result<BTreeMap<StepId, RowSet>, QueryExecutionError> {
        let mut outstanding: BTreeMap<StepId, usize> = BTreeMap::new();
        let mut set: JoinSet<TaskOutput> = JoinSet::new();

        for task in tasks {
            *outstanding.entry(task.step).or_default() += 1;
            let backend = Arc::clone(&self.backend);
            let permits = Arc::clone(&self.permits);
            let step = plan.steps[task.step].clone();
            set.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            task.step,
                            task.batch,
                            0,
                            Err(BackendError::new("executor closed")),
                        )
                    }
                };
                let started = StdInstant::now();
                let result = backend.run(&step, task.root_ids.as_deref()).await;
                (task.step, task.batch, started.elapsed().as_micros() as u64, result)
            });
        }

        let first_outstanding =
            |outstanding: &BTreeMap<StepId, usize>| outstanding.keys().next().copied().unwrap_or(0);

        let mut batches: BTreeMap<(StepId, usize), RowSet> = BTreeMap::new();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((step, batch, elapsed_us, Ok(rows)))) => {
                        debug!(step, batch, rows = rows.len(), elapsed_us, "round trip completed");
                        self.check_rows(&plan.steps[step], &rows)?;
                        batches.insert((step, batch), rows);
                        if let Some(count) = outstanding.get_mut(&step) {
                            *count -= 1;
                            if *count == 0 {
                                outstanding.remove(&step);
                            }
                        }
                    }
                    Some(Ok((step, batch, _, Err(err)))) => {
                        warn!(step, batch, error = %err, "round trip failed");
                        set.abort_all();
                        return Err(QueryExecutionError::Backend {
                            step,
                            batch,
                            message: err.0,
                        });
                    }
                    Some(Err(err)) => {
                        let step = first_outstanding(&outstanding);
                        warn!(step, error = %err, "round trip worker failed");
                        set.abort_all();
                        return Err(QueryExecutionError::Worker {
                            step,
                            message: err.to_string(),
                        });
                    }
                },
                _ = &mut sleep => {
                    let step = first_outstanding(&outstanding);
                    warn!(step, "request deadline passed");
                    set.abort_all();
                    return Err(QueryExecutionError::Timeout { step });
                }
                _ = ctx.cancelled() => {
                    let step = first_outstanding(&outstanding);
                    debug!(step, "request cancelled");
                    set.abort_all();
                    return Err(QueryExecutionError::Cancelled { step });
                }
            }
        }

        let mut merged: BTreeMap<StepId, RowSet> = BTreeMap::new();
        for ((step, _), rows) in batches {
            let entry = merged.entry(step).or_insert_with(|| RowSet::empty(step));
            entry.rows.extend(rows.rows);
            if entry.rows.len() > self.config.budget.max_rows_per_step {
                return Err(QueryExecutionError::RowLimit {
                    step,
                    rows: entry.rows.len(),
                    limit: self.config.budget.max_rows_per_step,
                });
            }
        }
        Ok(merged)
    }

    /// Check a batch against the row budget and the step's column count.
    fn check_rows(&self, step: &QueryStep, rows: &RowSet) -> Result<(), QueryExecutionError> {
        if rows.len() > self.config.budget.max_rows_per_step {
            return Err(QueryExecutionError::RowLimit {
                step: step.id,
                rows: rows.len(),
                limit: self.config.budget.max_rows_per_step,
            });
        }
        if let Some(row) = rows.rows.iter().find(|r| r.width() != step.columns.len()) {
            return Err(QueryExecutionError::Inconsistent {
                step: step.id,
                detail: format!(
                    "row has {} values, step selects {} columns",
                    row.width(),
                    step.columns.len()
                ),
            });
        }
        Ok(())
    }
}

/// Distinct root identities of a step's rows, in first-seen order.
fn root_ids(step: &QueryStep, rows: &RowSet) -> Result<Vec<Value>, QueryExecutionError> {
    let index = step
        .column_index("", &step.identity_field)
        .ok_or_else(|| QueryExecutionError::Inconsistent {
            step: step.id,
            detail: format!("identity column '{}' not selected", step.identity_field),
        })?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for row in &rows.rows {
        if let Some(key) = row.identity_at(index) {
            if seen.insert(key) {
                ids.push(row.values[index].clone());
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RowBudget;
    use crate::exec::ResultRow;
    use crate::graph::describe;
    use crate::plan::FetchPlanSelector;
    use crate::shop;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Returns one row per root: root steps yield `roots` orders, collection
    /// steps echo their root ids.
    struct ScriptedBackend {
        roots: i64,
        calls: Mutex<Vec<(StepId, Option<usize>)>>,
        fail_step: Option<StepId>,
        delay: Option<Duration>,
    }

    impl ScriptedBackend {
        fn new(roots: i64) -> Self {
            Self {
                roots,
                calls: Mutex::new(Vec::new()),
                fail_step: None,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn run(
            &self,
            step: &QueryStep,
            root_ids: Option<&[Value]>,
        ) -> Result<RowSet, BackendError> {
            self.calls.lock().push((step.id, root_ids.map(<[Value]>::len)));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_step == Some(step.id) {
                return Err(BackendError::new("connection reset"));
            }
            let ids: Vec<Value> = match root_ids {
                Some(ids) => ids.to_vec(),
                None => (1..=self.roots).map(Value::Int64).collect(),
            };
            let rows = ids
                .into_iter()
                .map(|id| {
                    let mut values = vec![Value::Null; step.columns.len()];
                    if let Some(i) = step.column_index("", &step.identity_field) {
                        values[i] = id;
                    }
                    ResultRow::new(values)
                })
                .collect();
            Ok(RowSet::new(step.id, rows))
        }
    }

    fn orders_plan(batch_size: usize) -> FetchPlan {
        let graph = describe(shop::schema().unwrap(), "Order").unwrap();
        let policy = crate::plan::FetchPolicy::default().with_batch_size(batch_size);
        FetchPlanSelector::new(policy)
            .select(&graph, &shop::orders())
            .unwrap()
    }

    #[tokio::test]
    async fn test_batches_dependent_step() {
        let backend = Arc::new(ScriptedBackend::new(250));
        let executor = QueryExecutor::new(backend.clone(), ExecutorConfig::default());

        let result = executor
            .execute(&orders_plan(100), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(result.round_trips, 4);
        assert_eq!(result.row_sets.len(), 2);
        assert_eq!(result.row_sets[1].len(), 250);
        let mut calls = backend.calls.lock().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![(0, None), (1, Some(50)), (1, Some(100)), (1, Some(100))]
        );
    }

    #[tokio::test]
    async fn test_batches_keep_root_order() {
        let backend = Arc::new(ScriptedBackend::new(7));
        let executor = QueryExecutor::new(backend, ExecutorConfig::default());

        let result = executor
            .execute(&orders_plan(2), &RequestContext::new())
            .await
            .unwrap();

        let ids: Vec<i64> = result.row_sets[1]
            .rows
            .iter()
            .filter_map(|r| r.values[0].as_i64())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_empty_root_skips_dependents() {
        let backend = Arc::new(ScriptedBackend::new(0));
        let executor = QueryExecutor::new(backend.clone(), ExecutorConfig::default());

        let result = executor
            .execute(&orders_plan(100), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(result.round_trips, 1);
        assert!(result.row_sets[1].is_empty());
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_names_step() {
        let mut backend = ScriptedBackend::new(3);
        backend.fail_step = Some(1);
        let executor = QueryExecutor::new(Arc::new(backend), ExecutorConfig::default());

        let err = executor
            .execute(&orders_plan(100), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QueryExecutionError::Backend {
                step: 1,
                batch: 0,
                message: "connection reset".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let mut backend = ScriptedBackend::new(3);
        backend.delay = Some(Duration::from_secs(5));
        let executor = QueryExecutor::new(Arc::new(backend), ExecutorConfig::default());
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(20));

        let err = executor
            .execute(&orders_plan(100), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, QueryExecutionError::Timeout { step: 0 });
    }

    #[tokio::test]
    async fn test_round_trip_budget() {
        let backend = Arc::new(ScriptedBackend::new(10));
        let config = ExecutorConfig::default().with_budget(RowBudget {
            max_rows_per_step: 50_000,
            max_round_trips: 3,
        });
        let executor = QueryExecutor::new(backend, config);

        let err = executor
            .execute(&orders_plan(2), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QueryExecutionError::RoundTripLimit {
                round_trips: 6,
                limit: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_row_budget() {
        let backend = Arc::new(ScriptedBackend::new(10));
        let config = ExecutorConfig::default().with_budget(RowBudget {
            max_rows_per_step: 5,
            max_round_trips: 1_000,
        });
        let executor = QueryExecutor::new(backend, config);

        let err = executor
            .execute(&orders_plan(100), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QueryExecutionError::RowLimit {
                step: 0,
                rows: 10,
                limit: 5,
            }
        );
    }
}
