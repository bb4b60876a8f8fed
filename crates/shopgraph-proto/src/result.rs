//! Assembled DTO types returned by a projection.
//!
//! DTOs are one-directional trees: a child never points back at its owner,
//! so they serialize without cycle handling.

use crate::value::Value;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// One element of a projection result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AssembledDto {
    /// A nested entity DTO (graph shapes).
    Entity(EntityDto),
    /// A flat row (direct projections).
    Flat(FlatDto),
}

/// An entity instance with its requested fields and relations.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDto {
    /// Entity type name.
    pub entity: String,
    /// Identity value.
    pub id: Value,
    /// Requested scalar fields, in request order.
    pub fields: Vec<(String, Value)>,
    /// Requested relations, in request order.
    pub relations: Vec<RelationDto>,
}

/// A named relation slot on an [`EntityDto`].
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDto {
    /// Relation name.
    pub name: String,
    /// Related DTO(s).
    pub value: RelationValue,
}

/// Value of a relation slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelationValue {
    /// To-one relation; `None` when the owner has no related entity.
    One(Option<Box<EntityDto>>),
    /// To-many relation in first-seen order.
    Many(Vec<EntityDto>),
}

/// A flat projection row.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatDto {
    /// Column label/value pairs, in request order.
    pub columns: Vec<(String, Value)>,
}

impl AssembledDto {
    /// Get the entity DTO, if this is one.
    pub fn as_entity(&self) -> Option<&EntityDto> {
        match self {
            AssembledDto::Entity(dto) => Some(dto),
            AssembledDto::Flat(_) => None,
        }
    }

    /// Get the flat row, if this is one.
    pub fn as_flat(&self) -> Option<&FlatDto> {
        match self {
            AssembledDto::Flat(dto) => Some(dto),
            AssembledDto::Entity(_) => None,
        }
    }
}

impl EntityDto {
    /// Create a DTO with no fields or relations.
    pub fn new(entity: impl Into<String>, id: Value) -> Self {
        Self {
            entity: entity.into(),
            id,
            fields: vec![],
            relations: vec![],
        }
    }

    /// Get a field value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a relation slot by name.
    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.value)
    }

    /// Get a to-one related DTO by relation name.
    pub fn one(&self, name: &str) -> Option<&EntityDto> {
        match self.relation(name) {
            Some(RelationValue::One(Some(dto))) => Some(dto),
            _ => None,
        }
    }

    /// Get to-many related DTOs by relation name.
    pub fn many(&self, name: &str) -> &[EntityDto] {
        match self.relation(name) {
            Some(RelationValue::Many(children)) => children,
            _ => &[],
        }
    }
}

impl FlatDto {
    /// Get a column value by label.
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == label).map(|(_, v)| v)
    }
}

impl Serialize for EntityDto {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.relations.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for relation in &self.relations {
            map.serialize_entry(&relation.name, &relation.value)?;
        }
        map.end()
    }
}

impl Serialize for FlatDto {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (label, value) in &self.columns {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_dto() -> EntityDto {
        let mut member = EntityDto::new("Member", Value::Int64(1));
        member.fields.push(("name".into(), Value::from("userA")));

        let mut item = EntityDto::new("OrderItem", Value::Int64(10));
        item.fields.push(("count".into(), Value::Int32(2)));

        let mut order = EntityDto::new("Order", Value::Int64(4));
        order.fields.push(("id".into(), Value::Int64(4)));
        order.relations.push(RelationDto {
            name: "member".into(),
            value: RelationValue::One(Some(Box::new(member))),
        });
        order.relations.push(RelationDto {
            name: "delivery".into(),
            value: RelationValue::One(None),
        });
        order.relations.push(RelationDto {
            name: "orderItems".into(),
            value: RelationValue::Many(vec![item]),
        });
        order
    }

    #[test]
    fn test_entity_accessors() {
        let order = order_dto();
        assert_eq!(order.field("id"), Some(&Value::Int64(4)));
        assert_eq!(order.one("member").unwrap().field("name"), Some(&Value::from("userA")));
        assert!(order.one("delivery").is_none());
        assert_eq!(order.many("orderItems").len(), 1);
        assert!(order.many("missing").is_empty());
    }

    #[test]
    fn test_entity_serializes_as_plain_object() {
        let json = serde_json::to_value(AssembledDto::Entity(order_dto())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 4,
                "member": {"name": "userA"},
                "delivery": null,
                "orderItems": [{"count": 2}]
            })
        );
    }

    #[test]
    fn test_flat_serializes_in_column_order() {
        let flat = FlatDto {
            columns: vec![
                ("orderId".into(), Value::Int64(4)),
                ("memberName".into(), Value::from("userA")),
            ],
        };
        assert_eq!(flat.get("memberName"), Some(&Value::from("userA")));
        let json = serde_json::to_string(&AssembledDto::Flat(flat)).unwrap();
        assert_eq!(json, r#"{"orderId":4,"memberName":"userA"}"#);
    }
}
