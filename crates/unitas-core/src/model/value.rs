//! Field values, primary keys, and identity keys

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A column-level value
///
/// Values are owned and compared structurally. A record snapshot is a deep
/// copy, so in-place edits to a `Json` document are detected by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short name of the variant, used in mapping errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Json(_) => "json",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One component of a primary key
///
/// Only hashable, totally ordered value kinds may form a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyPart {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl KeyPart {
    /// Extract a key part from a field value; `None` for null or non-key kinds
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(KeyPart::Int(*i)),
            Value::Text(s) => Some(KeyPart::Text(s.clone())),
            Value::Uuid(u) => Some(KeyPart::Uuid(*u)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Int(i) => Value::Int(*i),
            KeyPart::Text(s) => Value::Text(s.clone()),
            KeyPart::Uuid(u) => Value::Uuid(*u),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Text(s) => f.write_str(s),
            KeyPart::Uuid(u) => write!(f, "{}", u),
        }
    }
}

/// Primary-key tuple, in identifier-declaration order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<KeyPart>);

impl PrimaryKey {
    pub fn from_parts(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// The key when it has exactly one component
    pub fn single(&self) -> Option<&KeyPart> {
        match self.0.as_slice() {
            [part] => Some(part),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [part] => write!(f, "{}", part),
            parts => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<KeyPart> for PrimaryKey {
    fn from(part: KeyPart) -> Self {
        Self(vec![part])
    }
}

impl From<Vec<KeyPart>> for PrimaryKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        KeyPart::Int(v).into()
    }
}

impl From<i32> for PrimaryKey {
    fn from(v: i32) -> Self {
        KeyPart::Int(i64::from(v)).into()
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        KeyPart::Text(v.to_string()).into()
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        KeyPart::Text(v).into()
    }
}

impl From<Uuid> for PrimaryKey {
    fn from(v: Uuid) -> Self {
        KeyPart::Uuid(v).into()
    }
}

/// Name of a mapped entity type
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityType(Arc<str>);

impl EntityType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityType({})", self.0)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<&EntityType> for EntityType {
    fn from(ty: &EntityType) -> Self {
        ty.clone()
    }
}

/// Identity-map key: (type, primary key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    entity_type: EntityType,
    key: PrimaryKey,
}

impl IdentityKey {
    pub fn new(entity_type: EntityType, key: PrimaryKey) -> Self {
        Self { entity_type, key }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.key)
    }
}

/// Column name to value, as exchanged with persistence backends
pub type Row = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_part_from_value() {
        assert_eq!(KeyPart::from_value(&Value::Int(3)), Some(KeyPart::Int(3)));
        assert_eq!(
            KeyPart::from_value(&Value::from("sku-1")),
            Some(KeyPart::Text("sku-1".to_string()))
        );
        assert_eq!(KeyPart::from_value(&Value::Null), None);
        assert_eq!(KeyPart::from_value(&Value::Float(1.5)), None);
    }

    #[test]
    fn test_primary_key_display() {
        assert_eq!(PrimaryKey::from(5).to_string(), "5");
        let composite = PrimaryKey::from_parts(vec![KeyPart::Int(1), KeyPart::from_value(&"a".into()).unwrap()]);
        assert_eq!(composite.to_string(), "(1, a)");
        assert!(composite.single().is_none());
    }

    #[test]
    fn test_identity_key_display_and_eq() {
        let a = IdentityKey::new(EntityType::new("Product"), PrimaryKey::from(5));
        let b = IdentityKey::new(EntityType::from("Product"), 5.into());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Product#5");
    }

    #[test]
    fn test_json_values_compare_structurally() {
        let a = Value::Json(serde_json::json!({"tags": ["x"]}));
        let mut b = a.clone();
        assert_eq!(a, b);
        if let Value::Json(doc) = &mut b {
            doc["tags"][0] = serde_json::json!("y");
        }
        assert_ne!(a, b);
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }
}
