//! Integration tests for planning, execution and assembly over the shop domain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shopgraph_core::config::{ExecutorConfig, ProjectorConfig};
use shopgraph_core::exec::{BackendError, QueryBackend, RequestContext, RowSet};
use shopgraph_core::graph::{
    describe, EntityGraph, EntityType, FetchStrategy, RelationDescriptor, Schema, SchemaBuilder,
};
use shopgraph_core::plan::{FetchPolicy, PlanStrategy, QueryStep};
use shopgraph_core::storage::{SledBackend, StorageConfig};
use shopgraph_core::{shop, Error, PlanError, Projector, QueryExecutionError};
use shopgraph_proto::{
    AssembledDto, EntityDto, FilterExpr, OrderSpec, Pagination, ProjectionRequest,
    RelationInclude, Value,
};

struct TestContext {
    schema: Arc<Schema>,
    backend: SledBackend,
}

impl TestContext {
    fn new() -> Self {
        let schema = shop::schema().unwrap();
        let backend = SledBackend::open(&StorageConfig::temporary()).unwrap();
        shop::seed(&schema, &backend).unwrap();
        Self { schema, backend }
    }

    fn graph(&self, root: &str) -> EntityGraph {
        describe(Arc::clone(&self.schema), root).unwrap()
    }

    fn projector(&self, config: ProjectorConfig) -> Projector {
        Projector::new(Arc::new(self.backend.clone()), config)
    }
}

fn entities(dtos: &[AssembledDto]) -> Vec<&EntityDto> {
    dtos.iter().filter_map(AssembledDto::as_entity).collect()
}

/// Delays every round trip.
struct SlowBackend {
    inner: SledBackend,
    delay: Duration,
}

#[async_trait]
impl QueryBackend for SlowBackend {
    async fn run(&self, step: &QueryStep, root_ids: Option<&[Value]>) -> Result<RowSet, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.run(step, root_ids).await
    }
}

/// Fails every round trip of one step.
struct FailingBackend {
    inner: SledBackend,
    fail_step: usize,
}

#[async_trait]
impl QueryBackend for FailingBackend {
    async fn run(&self, step: &QueryStep, root_ids: Option<&[Value]>) -> Result<RowSet, BackendError> {
        if step.id == self.fail_step {
            return Err(BackendError::new("connection reset"));
        }
        self.inner.run(step, root_ids).await
    }
}

#[tokio::test]
async fn test_orders_with_items_in_two_round_trips() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let dtos = projector
        .project(&graph, &shop::orders(), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(ctx.backend.round_trips(), 2);
    let orders = entities(&dtos);
    assert_eq!(orders.len(), 2);

    let first = orders[0];
    assert_eq!(first.id, Value::Int64(1));
    assert_eq!(first.field("status"), Some(&Value::String("ORDER".into())));
    assert_eq!(
        first.one("member").and_then(|m| m.field("name")),
        Some(&Value::String("userA".into()))
    );
    assert_eq!(
        first.one("delivery").and_then(|d| d.field("city")),
        Some(&Value::String("Seoul".into()))
    );

    let items = first.many("orderItems");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].field("orderPrice"), Some(&Value::Int64(10_000)));
    assert_eq!(
        items[1].one("item").and_then(|i| i.field("name")),
        Some(&Value::String("JPA2 BOOK".into()))
    );

    let second = orders[1];
    assert_eq!(second.id, Value::Int64(2));
    let names: Vec<_> = second
        .many("orderItems")
        .iter()
        .filter_map(|oi| oi.one("item").and_then(|i| i.field("name")).cloned())
        .collect();
    assert_eq!(
        names,
        vec![
            Value::String("SPRING1 BOOK".into()),
            Value::String("SPRING2 BOOK".into())
        ]
    );
}

#[tokio::test]
async fn test_to_one_only_request_is_single_round_trip() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let plan = projector.plan(&graph, &shop::simple_orders()).unwrap();
    assert_eq!(plan.strategy, PlanStrategy::SingleStep);

    let dtos = projector
        .project(&graph, &shop::simple_orders(), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(ctx.backend.round_trips(), 1);
    assert_eq!(dtos.len(), 2);
    assert!(entities(&dtos)[0].relation("orderItems").is_none());
}

#[tokio::test]
async fn test_two_collections_rejected_before_any_round_trip() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let request = shop::orders().include(
        RelationInclude::new("discounts").with_fields(vec!["code".into()]),
    );
    let err = projector
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap_err();

    assert!(err.is_client_error());
    assert!(matches!(
        err,
        Error::Plan(PlanError::IndependentCollections { count: 2, max: 1, .. })
    ));
    assert_eq!(ctx.backend.round_trips(), 0);
    assert_eq!(projector.metrics().snapshot().plan_errors, 1);
}

#[tokio::test]
async fn test_two_collections_allowed_when_policy_permits() {
    let ctx = TestContext::new();
    let policy = FetchPolicy::default().with_max_collection_steps(2);
    let projector = ctx.projector(ProjectorConfig::default().with_policy(policy));
    let graph = ctx.graph("Order");

    let request = shop::orders().include(
        RelationInclude::new("discounts").with_fields(vec!["code".into()]),
    );
    let dtos = projector
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(ctx.backend.round_trips(), 3);
    let orders = entities(&dtos);
    assert_eq!(orders[0].many("orderItems").len(), 2);
    assert_eq!(orders[0].many("discounts").len(), 1);
    assert_eq!(orders[1].many("orderItems").len(), 2);
    assert!(orders[1].many("discounts").is_empty());
}

#[tokio::test]
async fn test_flat_projection_one_row_per_root() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let dtos = projector
        .project(&graph, &shop::order_flat(), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(ctx.backend.round_trips(), 1);
    assert_eq!(dtos.len(), ctx.backend.count("Order").unwrap());

    let row = dtos[1].as_flat().unwrap();
    assert_eq!(row.get("orderId"), Some(&Value::Int64(2)));
    assert_eq!(row.get("memberName"), Some(&Value::String("userB".into())));
    assert_eq!(row.get("orderStatus"), Some(&Value::String("ORDER".into())));
    assert_eq!(row.get("delivery.city"), Some(&Value::String("Jinju".into())));
}

#[tokio::test]
async fn test_projection_is_idempotent() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let first = projector
        .project(&graph, &shop::orders(), &RequestContext::new())
        .await
        .unwrap();
    let second = projector
        .project(&graph, &shop::orders(), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn test_filter_order_and_page_apply_to_roots() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let request = shop::orders()
        .with_filter(FilterExpr::eq("status", "ORDER"))
        .with_order(OrderSpec::desc("id"))
        .with_pagination(Pagination::limit(1));
    let dtos = projector
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap();

    let orders = entities(&dtos);
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id, Value::Int64(2));
    let item_ids: Vec<_> = orders[0]
        .many("orderItems")
        .iter()
        .map(|oi| oi.id.clone())
        .collect();
    assert_eq!(item_ids, vec![Value::Int64(3), Value::Int64(4)]);
}

#[tokio::test]
async fn test_root_ids_select_roots() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Member");

    let request = shop::members().with_root_ids(vec![Value::Int64(2)]);
    let dtos = projector
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap();

    let members = entities(&dtos);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].field("city"), Some(&Value::String("Jinju".into())));
}

#[tokio::test]
async fn test_no_roots_yields_empty_result() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let request = shop::orders().with_filter(FilterExpr::eq("status", "CANCEL"));
    let dtos = projector
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap();

    assert!(dtos.is_empty());
    assert_eq!(ctx.backend.round_trips(), 1);
}

#[tokio::test]
async fn test_eager_collection_joined_and_deduplicated() {
    let ctx = TestContext::new();
    let schema = SchemaBuilder::new(2)
        .with_entity(EntityType::new("Order", "id").with_fields(["status"]))
        .with_entity(
            EntityType::new("OrderItem", "id").with_fields(["orderId", "itemId", "orderPrice"]),
        )
        .with_entity(EntityType::new("Item", "id").with_fields(["name"]))
        .with_relation(
            "Order",
            RelationDescriptor::to_many("orderItems", "OrderItem", "id", "orderId", 4)
                .with_strategy(FetchStrategy::EagerJoin),
        )
        .with_relation(
            "OrderItem",
            RelationDescriptor::to_one("item", "Item", "itemId", "id"),
        )
        .build()
        .unwrap();
    let graph = describe(Arc::new(schema), "Order").unwrap();
    let projector = ctx.projector(ProjectorConfig::default());

    let request = ProjectionRequest::graph("Order")
        .with_fields(vec!["status".into()])
        .include(RelationInclude::new("orderItems.item").with_fields(vec!["name".into()]));
    let plan = projector.plan(&graph, &request).unwrap();
    assert_eq!(plan.strategy, PlanStrategy::JoinFetch);

    let dtos = projector
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap();

    // Four joined rows fold into two roots with two children each.
    assert_eq!(ctx.backend.round_trips(), 1);
    let orders = entities(&dtos);
    assert_eq!(orders.len(), 2);
    for order in orders {
        assert_eq!(order.many("orderItems").len(), 2);
        assert!(order.many("orderItems").iter().all(|oi| oi.one("item").is_some()));
    }
}

fn line_schema() -> Arc<Schema> {
    let schema = SchemaBuilder::new(4)
        .with_entity(EntityType::new("Order", "id").with_fields(["status"]))
        .with_entity(EntityType::new("OrderItem", "id").with_fields(["orderId"]))
        .with_entity(EntityType::new("Tag", "id").with_fields(["orderItemId", "label"]))
        .with_entity(EntityType::new("Note", "id").with_fields(["orderItemId", "text"]))
        .with_relation(
            "Order",
            RelationDescriptor::to_many("orderItems", "OrderItem", "id", "orderId", 4),
        )
        .with_relation(
            "OrderItem",
            RelationDescriptor::to_many("tags", "Tag", "id", "orderItemId", 5),
        )
        .with_relation(
            "OrderItem",
            RelationDescriptor::to_many("notes", "Note", "id", "orderItemId", 5),
        )
        .build()
        .unwrap();
    Arc::new(schema)
}

fn seed_line(schema: &Schema, backend: &SledBackend, tags: i64, notes: i64) {
    let entity = |name: &str| schema.entity(schema.lookup(name).unwrap());
    backend
        .insert(
            entity("Order"),
            vec![
                ("id".to_string(), Value::Int64(1)),
                ("status".to_string(), Value::from("ORDER")),
            ],
        )
        .unwrap();
    backend
        .insert(
            entity("OrderItem"),
            vec![
                ("id".to_string(), Value::Int64(10)),
                ("orderId".to_string(), Value::Int64(1)),
            ],
        )
        .unwrap();
    for id in 1..=tags {
        backend
            .insert(
                entity("Tag"),
                vec![
                    ("id".to_string(), Value::Int64(id)),
                    ("orderItemId".to_string(), Value::Int64(10)),
                    ("label".to_string(), Value::from(format!("tag-{id}"))),
                ],
            )
            .unwrap();
    }
    for id in 1..=notes {
        backend
            .insert(
                entity("Note"),
                vec![
                    ("id".to_string(), Value::Int64(id)),
                    ("orderItemId".to_string(), Value::Int64(10)),
                    ("text".to_string(), Value::from(format!("note-{id}"))),
                ],
            )
            .unwrap();
    }
}

#[tokio::test]
async fn test_sibling_collections_fetched_without_cross_product() {
    let schema = line_schema();
    let backend = SledBackend::open(&StorageConfig::temporary()).unwrap();
    seed_line(&schema, &backend, 30, 30);
    let graph = describe(schema, "Order").unwrap();
    let request = ProjectionRequest::graph("Order")
        .include(RelationInclude::new("orderItems.tags"))
        .include(RelationInclude::new("orderItems.notes"));

    let strict = Projector::new(Arc::new(backend.clone()), ProjectorConfig::default());
    let err = strict
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Plan(PlanError::IndependentCollections { count: 2, max: 1, .. })
    ));
    assert_eq!(backend.round_trips(), 0);

    let policy = FetchPolicy::default().with_max_collection_steps(2);
    let projector = Projector::new(
        Arc::new(backend.clone()),
        ProjectorConfig::default().with_policy(policy),
    );
    let plan = projector.plan(&graph, &request).unwrap();
    assert_eq!(plan.steps.len(), 3);
    for step in &plan.steps[1..] {
        let rows = backend.run(step, Some(&[Value::Int64(1)])).await.unwrap();
        assert_eq!(rows.rows.len(), 30);
    }

    let before = backend.round_trips();
    let dtos = projector
        .project(&graph, &request, &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(backend.round_trips() - before, 3);

    let orders = entities(&dtos);
    assert_eq!(orders.len(), 1);
    let lines = orders[0].many("orderItems");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].many("tags").len(), 30);
    assert_eq!(lines[0].many("notes").len(), 30);
}

#[tokio::test]
async fn test_collection_batches_by_batch_size() {
    let schema = shop::schema().unwrap();
    let backend = SledBackend::open(&StorageConfig::temporary()).unwrap();
    let order = schema.entity(schema.lookup("Order").unwrap());
    for id in 1..=250i64 {
        backend
            .insert(
                order,
                vec![
                    ("id".to_string(), Value::Int64(id)),
                    ("memberId".to_string(), Value::Int64(1)),
                    ("deliveryId".to_string(), Value::Int64(id)),
                    ("orderDate".to_string(), Value::Timestamp(id)),
                    ("status".to_string(), Value::from("ORDER")),
                ],
            )
            .unwrap();
    }

    let projector = Projector::new(
        Arc::new(backend.clone()),
        ProjectorConfig::default().with_policy(FetchPolicy::default().with_batch_size(100)),
    );
    let graph = describe(schema, "Order").unwrap();
    let dtos = projector
        .project(&graph, &shop::orders(), &RequestContext::new())
        .await
        .unwrap();

    // 1 root step + ceil(250 / 100) collection batches.
    assert_eq!(backend.round_trips(), 4);
    let orders = entities(&dtos);
    assert_eq!(orders.len(), 250);
    assert!(orders.iter().all(|o| o.many("orderItems").is_empty()));
    assert!(orders.iter().all(|o| o.one("member").is_none()));
    assert_eq!(orders[249].id, Value::Int64(250));
}

#[tokio::test]
async fn test_deadline_fails_whole_request() {
    let ctx = TestContext::new();
    let backend = SlowBackend {
        inner: ctx.backend.clone(),
        delay: Duration::from_secs(5),
    };
    let projector = Projector::new(Arc::new(backend), ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let request_ctx = RequestContext::new().with_timeout(Duration::from_millis(20));
    let err = projector
        .project(&graph, &shop::orders(), &request_ctx)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Query(QueryExecutionError::Timeout { step: 0 })
    ));
    assert!(!err.is_client_error());
    assert_eq!(projector.metrics().snapshot().execution_errors, 1);
}

#[tokio::test]
async fn test_default_timeout_from_config() {
    let ctx = TestContext::new();
    let backend = SlowBackend {
        inner: ctx.backend.clone(),
        delay: Duration::from_secs(5),
    };
    let config = ProjectorConfig::default()
        .with_executor(ExecutorConfig::default().with_default_timeout(Duration::from_millis(20)));
    let projector = Projector::new(Arc::new(backend), config);
    let graph = ctx.graph("Order");

    let err = projector
        .project(&graph, &shop::simple_orders(), &RequestContext::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryExecutionError::Timeout { step: 0 })
    ));
}

#[tokio::test]
async fn test_cancellation_stops_request() {
    let ctx = TestContext::new();
    let backend = SlowBackend {
        inner: ctx.backend.clone(),
        delay: Duration::from_secs(5),
    };
    let projector = Projector::new(Arc::new(backend), ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let (request_ctx, handle) = RequestContext::new().with_cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let err = projector
        .project(&graph, &shop::orders(), &request_ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryExecutionError::Cancelled { step: 0 })
    ));
}

#[tokio::test]
async fn test_failed_collection_step_discards_roots() {
    let ctx = TestContext::new();
    let backend = FailingBackend {
        inner: ctx.backend.clone(),
        fail_step: 1,
    };
    let projector = Projector::new(Arc::new(backend), ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let err = projector
        .project(&graph, &shop::orders(), &RequestContext::new())
        .await
        .unwrap_err();
    match err {
        Error::Query(QueryExecutionError::Backend { step, message, .. }) => {
            assert_eq!(step, 1);
            assert_eq!(message, "connection reset");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_plan_cache_reuses_plans() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Order");

    let all = projector
        .project(&graph, &shop::orders(), &RequestContext::new())
        .await
        .unwrap();
    let filtered = projector
        .project(
            &graph,
            &shop::orders().with_filter(FilterExpr::eq("id", Value::Int64(2))),
            &RequestContext::new(),
        )
        .await
        .unwrap();
    let narrowed = projector
        .project(
            &graph,
            &shop::orders().with_filter(FilterExpr::eq("id", Value::Int64(1))),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(entities(&filtered)[0].id, Value::Int64(2));
    assert_eq!(entities(&narrowed)[0].id, Value::Int64(1));

    let snapshot = projector.metrics().snapshot();
    assert_eq!(snapshot.requests, 3);
    assert_eq!(snapshot.plan_cache_hits, 1);
    assert_eq!(snapshot.plan_cache_misses, 2);
    assert_eq!(snapshot.batched_plans, 3);
    assert_eq!(snapshot.round_trips, 6);
    assert_eq!(snapshot.requests_by_root.get("Order"), Some(&3));
}

#[tokio::test]
async fn test_cached_plan_still_checks_root_ids() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let graph = ctx.graph("Member");

    projector
        .project(
            &graph,
            &shop::members().with_root_ids(vec![Value::Int64(1)]),
            &RequestContext::new(),
        )
        .await
        .unwrap();
    let err = projector
        .project(
            &graph,
            &shop::members().with_root_ids(vec![Value::Int64(1), Value::Null]),
            &RequestContext::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Plan(PlanError::InvalidRootId { position: 1 })
    ));
}

#[tokio::test]
async fn test_explain_describes_steps() {
    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default().with_plan_cache_entries(0));
    let graph = ctx.graph("Order");

    let text = projector.explain(&graph, &shop::orders()).unwrap();
    assert!(text.contains("batched_collections"));
    assert!(text.contains("collection"));
    assert!(projector.plan_cache().is_none());
}

#[tokio::test]
async fn test_unknown_root_entity() {
    let schema = shop::schema().unwrap();
    let err = describe(schema, "Coupon").unwrap_err();
    assert!(err.to_string().contains("Coupon"));

    let ctx = TestContext::new();
    let projector = ctx.projector(ProjectorConfig::default());
    let err = projector
        .plan(&ctx.graph("Order"), &ProjectionRequest::graph("Member"))
        .unwrap_err();
    assert!(matches!(err, PlanError::RootMismatch { .. }));
}
