//! Stored entity records.

use rkyv::{Archive, Deserialize, Serialize};
use shopgraph_proto::Value;

use crate::error::StorageError;

/// One field of a stored entity.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StoredField {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: Value,
}

/// An entity instance as stored in its tree.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StoredEntity {
    /// Fields in insertion order.
    pub fields: Vec<StoredField>,
}

impl StoredEntity {
    /// Create a record from name/value pairs.
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, value)| StoredField { name, value })
                .collect(),
        }
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }

    /// Serialize to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes using rkyv.
    ///
    /// sled hands out values without alignment guarantees, so the bytes are
    /// copied into an aligned buffer first.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| StorageError::Deserialization(e.to_string()))
    }
}
