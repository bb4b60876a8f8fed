//! Relation descriptors between entity types.

use serde::{Deserialize, Serialize};

/// Cardinality of a relation seen from its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Many-to-one or one-to-one: at most one target per owner.
    One,
    /// One-to-many: any number of targets per owner.
    Many,
}

/// Declared default strategy for loading a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Load only when a plan asks for it, in a separate batched step for
    /// collections.
    Lazy,
    /// Prefer joining into the owner's round trip.
    EagerJoin,
}

/// A relation from an owner entity to a target entity.
///
/// The join condition is `owner.local_field = target.foreign_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Relation name (unique within the owner).
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Declared default strategy.
    pub strategy: FetchStrategy,
    /// Estimated number of targets per owner.
    pub fan_out: u32,
    /// Field on the owner.
    pub local_field: String,
    /// Field on the target.
    pub foreign_field: String,
    /// Inverse side of another relation: a weak lookup that does not own
    /// its target and may close a cycle.
    pub back_reference: bool,
}

impl RelationDescriptor {
    /// Create a to-one relation (many-to-one or one-to-one).
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            strategy: FetchStrategy::Lazy,
            fan_out: 1,
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            back_reference: false,
        }
    }

    /// Create a to-many relation with an estimated fan-out.
    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        fan_out: u32,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
            strategy: FetchStrategy::Lazy,
            fan_out: fan_out.max(1),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            back_reference: false,
        }
    }

    /// Set the declared default strategy.
    pub fn with_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the estimated fan-out. Ignored for to-one relations.
    pub fn with_fan_out(mut self, fan_out: u32) -> Self {
        if self.is_many() {
            self.fan_out = fan_out.max(1);
        }
        self
    }

    /// Mark this relation as the inverse side of another.
    pub fn back_reference(mut self) -> Self {
        self.back_reference = true;
        self
    }

    /// Check if this is a to-many relation.
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_one_relation() {
        let rel = RelationDescriptor::to_one("member", "Member", "memberId", "id").with_fan_out(9);

        assert_eq!(rel.cardinality, Cardinality::One);
        assert_eq!(rel.fan_out, 1);
        assert_eq!(rel.strategy, FetchStrategy::Lazy);
        assert!(!rel.back_reference);
    }

    #[test]
    fn test_to_many_relation() {
        let rel = RelationDescriptor::to_many("orderItems", "OrderItem", "id", "orderId", 0)
            .with_strategy(FetchStrategy::EagerJoin);

        assert!(rel.is_many());
        assert_eq!(rel.fan_out, 1);
        assert_eq!(rel.strategy, FetchStrategy::EagerJoin);
        assert_eq!(rel.with_fan_out(12).fan_out, 12);
    }

    #[test]
    fn test_back_reference_flag() {
        let rel = RelationDescriptor::to_many("orders", "Order", "id", "memberId", 3).back_reference();
        assert!(rel.back_reference);
    }
}
