//! Runtime value types for requests, rows and DTOs.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A runtime value flowing through plans, result rows and assembled DTOs.
///
/// Serialized with serde as an untagged value so that DTOs render as plain
/// JSON scalars. Integers deserialize as `Int64`.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Timestamp as microseconds since Unix epoch.
    Timestamp(i64),
    /// UUID as 16 bytes.
    Uuid([u8; 16]),
}

/// Hashable identity of an entity instance.
///
/// Rows carry identities as [`Value`]s; grouping and id-set lookups need a key
/// that implements `Eq + Hash`, with `Int32`/`Int64` folded together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Int(i64),
    Str(String),
    Uuid([u8; 16]),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::Int32(i) => Some(*i as i64),
            _ => None,
        }
    }

    /// Try to get as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            Value::Int64(i) => Some(*i as f64),
            Value::Int32(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as timestamp.
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Identity key for values usable as entity identifiers.
    ///
    /// Returns `None` for null, booleans, floats and timestamps.
    pub fn identity_key(&self) -> Option<IdentityKey> {
        match self {
            Value::Int64(i) => Some(IdentityKey::Int(*i)),
            Value::Int32(i) => Some(IdentityKey::Int(*i as i64)),
            Value::String(s) => Some(IdentityKey::Str(s.clone())),
            Value::Uuid(u) => Some(IdentityKey::Uuid(*u)),
            _ => None,
        }
    }
}

impl IdentityKey {
    /// Order-preserving byte encoding, used as a storage key.
    ///
    /// Integers are written big-endian with the sign bit flipped so that
    /// lexicographic byte order matches numeric order.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            IdentityKey::Int(i) => {
                let mut buf = Vec::with_capacity(9);
                buf.push(0);
                buf.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
                buf
            }
            IdentityKey::Str(s) => {
                let mut buf = Vec::with_capacity(s.len() + 1);
                buf.push(1);
                buf.extend_from_slice(s.as_bytes());
                buf
            }
            IdentityKey::Uuid(u) => {
                let mut buf = Vec::with_capacity(17);
                buf.push(2);
                buf.extend_from_slice(u);
                buf
            }
        }
    }
}

impl From<IdentityKey> for Value {
    fn from(key: IdentityKey) -> Self {
        match key {
            IdentityKey::Int(i) => Value::Int64(i),
            IdentityKey::Str(s) => Value::String(s),
            IdentityKey::Uuid(u) => Value::Uuid(u),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_folds_integer_widths() {
        assert_eq!(Value::Int32(7).identity_key(), Value::Int64(7).identity_key());
        assert_eq!(Value::Null.identity_key(), None);
        assert_eq!(Value::Float64(1.0).identity_key(), None);
    }

    #[test]
    fn test_identity_key_encoding_preserves_order() {
        let keys: Vec<Vec<u8>> = [-5i64, -1, 0, 1, 2, 300]
            .iter()
            .map(|i| IdentityKey::Int(*i).encode())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_value_json_is_untagged() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::Int64(3),
            Value::String("kim".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,3,"kim"]"#);

        let back: Value = serde_json::from_str("42").unwrap();
        assert_eq!(back, Value::Int64(42));
    }

    #[test]
    fn test_value_rkyv_roundtrip() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int64(i64::MAX),
            Value::Float64(std::f64::consts::PI),
            Value::String("seoul".into()),
            Value::Timestamp(1_704_067_200_000_000),
        ];

        for value in values {
            let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&value).unwrap();
            let archived = rkyv::access::<ArchivedValue, rkyv::rancor::Error>(&bytes).unwrap();
            let deserialized: Value =
                rkyv::deserialize::<Value, rkyv::rancor::Error>(archived).unwrap();
            assert_eq!(value, deserialized);
        }
    }
}
