//! The online-shop domain: schema, fixture data and request presets.
//!
//! Presets reproduce the shop's order endpoints as fetch policies:
//!
//! | Preset          | Shape                                          |
//! |-----------------|------------------------------------------------|
//! | `simple-orders` | Order + member + delivery                      |
//! | `orders`        | Order + member + delivery + orderItems.item    |
//! | `order-flat`    | orderId, memberName, orderDate, status, city   |
//! | `members`       | Member name and address                        |

use std::sync::Arc;

use shopgraph_proto::{ColumnSelect, ProjectionRequest, RelationInclude, Value};

use crate::error::{SchemaError, StorageError};
use crate::graph::{EntityType, RelationDescriptor, Schema, SchemaBuilder};
use crate::storage::SledBackend;

/// Schema version of the shop domain.
pub const SCHEMA_VERSION: u64 = 1;

/// Names of the request presets.
pub const PRESETS: &[&str] = &["simple-orders", "orders", "order-flat", "members"];

/// Build the shop schema.
pub fn schema() -> Result<Arc<Schema>, SchemaError> {
    let schema = SchemaBuilder::new(SCHEMA_VERSION)
        .with_entity(
            EntityType::new("Member", "id").with_fields(["name", "city", "street", "zipcode"]),
        )
        .with_entity(
            EntityType::new("Order", "id")
                .with_fields(["memberId", "deliveryId", "orderDate", "status"]),
        )
        .with_entity(
            EntityType::new("Delivery", "id").with_fields(["city", "street", "zipcode", "status"]),
        )
        .with_entity(
            EntityType::new("OrderItem", "id")
                .with_fields(["orderId", "itemId", "orderPrice", "count"]),
        )
        .with_entity(EntityType::new("Item", "id").with_fields(["name", "price", "stockQuantity"]))
        .with_entity(EntityType::new("Discount", "id").with_fields(["orderId", "code", "amount"]))
        .with_relation(
            "Member",
            RelationDescriptor::to_many("orders", "Order", "id", "memberId", 3).back_reference(),
        )
        .with_relation(
            "Order",
            RelationDescriptor::to_one("member", "Member", "memberId", "id"),
        )
        .with_relation(
            "Order",
            RelationDescriptor::to_one("delivery", "Delivery", "deliveryId", "id"),
        )
        .with_relation(
            "Order",
            RelationDescriptor::to_many("orderItems", "OrderItem", "id", "orderId", 4),
        )
        .with_relation(
            "Order",
            RelationDescriptor::to_many("discounts", "Discount", "id", "orderId", 2),
        )
        .with_relation(
            "Delivery",
            RelationDescriptor::to_one("order", "Order", "id", "deliveryId").back_reference(),
        )
        .with_relation(
            "OrderItem",
            RelationDescriptor::to_one("item", "Item", "itemId", "id"),
        )
        .with_relation(
            "OrderItem",
            RelationDescriptor::to_one("order", "Order", "orderId", "id").back_reference(),
        )
        .build()?;
    Ok(Arc::new(schema))
}

/// Look up a request preset by name.
pub fn preset(name: &str) -> Option<ProjectionRequest> {
    match name {
        "simple-orders" => Some(simple_orders()),
        "orders" => Some(orders()),
        "order-flat" => Some(order_flat()),
        "members" => Some(members()),
        _ => None,
    }
}

/// Orders with their member and delivery.
pub fn simple_orders() -> ProjectionRequest {
    ProjectionRequest::graph("Order")
        .with_fields(vec!["orderDate".into(), "status".into()])
        .include(RelationInclude::new("member").with_fields(vec!["name".into()]))
        .include(
            RelationInclude::new("delivery").with_fields(vec![
                "city".into(),
                "street".into(),
                "zipcode".into(),
            ]),
        )
}

/// Orders with member, delivery and line items.
pub fn orders() -> ProjectionRequest {
    simple_orders()
        .include(
            RelationInclude::new("orderItems")
                .with_fields(vec!["orderPrice".into(), "count".into()]),
        )
        .include(RelationInclude::new("orderItems.item").with_fields(vec!["name".into()]))
}

/// Flat order summary rows.
pub fn order_flat() -> ProjectionRequest {
    ProjectionRequest::flat("Order")
        .column(ColumnSelect::root("id").alias("orderId"))
        .column(ColumnSelect::at("member", "name").alias("memberName"))
        .column(ColumnSelect::root("orderDate"))
        .column(ColumnSelect::root("status").alias("orderStatus"))
        .column(ColumnSelect::at("delivery", "city"))
}

/// Members with their address.
pub fn members() -> ProjectionRequest {
    ProjectionRequest::graph("Member").with_fields(vec![
        "name".into(),
        "city".into(),
        "street".into(),
        "zipcode".into(),
    ])
}

fn record(pairs: Vec<(&str, Value)>) -> Vec<(String, Value)> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Seed a store with two members, each with one order of two items.
///
/// Order 1 carries a discount so that independent collections can be
/// exercised.
pub fn seed(schema: &Schema, backend: &SledBackend) -> Result<(), StorageError> {
    let entity = |name: &str| -> Result<&EntityType, StorageError> {
        schema
            .lookup(name)
            .map(|idx| schema.entity(idx))
            .ok_or_else(|| StorageError::UnknownEntity {
                entity: name.to_string(),
            })
    };
    let member = entity("Member")?;
    let order = entity("Order")?;
    let delivery = entity("Delivery")?;
    let order_item = entity("OrderItem")?;
    let item = entity("Item")?;
    let discount = entity("Discount")?;

    let members = [
        (1, "userA", "Seoul", "1", "1111"),
        (2, "userB", "Jinju", "2", "2222"),
    ];
    for (id, name, city, street, zipcode) in members {
        backend.insert(
            member,
            record(vec![
                ("id", Value::Int64(id)),
                ("name", name.into()),
                ("city", city.into()),
                ("street", street.into()),
                ("zipcode", zipcode.into()),
            ]),
        )?;
    }

    let items = [
        (1, "JPA1 BOOK", 10_000, 99),
        (2, "JPA2 BOOK", 20_000, 98),
        (3, "SPRING1 BOOK", 20_000, 197),
        (4, "SPRING2 BOOK", 40_000, 296),
    ];
    for (id, name, price, stock) in items {
        backend.insert(
            item,
            record(vec![
                ("id", Value::Int64(id)),
                ("name", name.into()),
                ("price", Value::Int64(price)),
                ("stockQuantity", Value::Int64(stock)),
            ]),
        )?;
    }

    // 2024-01-01T00:00:00Z in microseconds.
    let base_time = 1_704_067_200_000_000i64;
    for (order_id, member_id, city, street, zipcode) in
        [(1, 1, "Seoul", "1", "1111"), (2, 2, "Jinju", "2", "2222")]
    {
        backend.insert(
            delivery,
            record(vec![
                ("id", Value::Int64(order_id)),
                ("city", city.into()),
                ("street", street.into()),
                ("zipcode", zipcode.into()),
                ("status", "READY".into()),
            ]),
        )?;
        backend.insert(
            order,
            record(vec![
                ("id", Value::Int64(order_id)),
                ("memberId", Value::Int64(member_id)),
                ("deliveryId", Value::Int64(order_id)),
                ("orderDate", Value::Timestamp(base_time + order_id * 3_600_000_000)),
                ("status", "ORDER".into()),
            ]),
        )?;
    }

    let order_items = [
        (1, 1, 1, 10_000, 1),
        (2, 1, 2, 20_000, 2),
        (3, 2, 3, 20_000, 3),
        (4, 2, 4, 40_000, 4),
    ];
    for (id, order_id, item_id, price, count) in order_items {
        backend.insert(
            order_item,
            record(vec![
                ("id", Value::Int64(id)),
                ("orderId", Value::Int64(order_id)),
                ("itemId", Value::Int64(item_id)),
                ("orderPrice", Value::Int64(price)),
                ("count", Value::Int64(count)),
            ]),
        )?;
    }

    backend.insert(
        discount,
        record(vec![
            ("id", Value::Int64(1)),
            ("orderId", Value::Int64(1)),
            ("code", "WELCOME".into()),
            ("amount", Value::Int64(1_000)),
        ]),
    )?;

    backend.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::describe;

    #[test]
    fn test_schema_builds() {
        let schema = schema().unwrap();
        assert_eq!(schema.version(), SCHEMA_VERSION);
        assert_eq!(
            schema.entity_names(),
            vec!["Member", "Order", "Delivery", "OrderItem", "Item", "Discount"]
        );

        let graph = describe(schema, "Order").unwrap();
        assert!(graph.resolve("orderItems.item").is_ok());
        assert!(graph.resolve("delivery.order").unwrap().crosses_back_reference());
    }

    #[test]
    fn test_presets_resolve() {
        for name in PRESETS {
            assert!(preset(name).is_some(), "missing preset {name}");
        }
        assert!(preset("orders-v5").is_none());
        assert!(preset("order-flat").unwrap().is_flat());
    }
}
