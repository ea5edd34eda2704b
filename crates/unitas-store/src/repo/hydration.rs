//! Hydration layer - converts between field values and SQLite values
//!
//! Storage classes by field kind:
//! - `Bool` as INTEGER 0/1
//! - `Uuid` as hyphenated TEXT (16-byte BLOBs are read too)
//! - `Timestamp` as RFC 3339 TEXT in UTC (integer epoch seconds are read too)
//! - `Json` as TEXT

#![allow(clippy::result_large_err)]

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use unitas_core::metadata::{EntityMetadata, FieldKind, JoinTableMetadata, MetadataRegistry};
use unitas_core::model::{EntityType, KeyPart, Row, Value};
use unitas_core::UnitasError;
use uuid::Uuid;

use crate::errors::{decode_error, Result};

/// Encode a field value for binding
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
        Value::Timestamp(t) => SqlValue::Text(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Json(j) => SqlValue::Text(j.to_string()),
    }
}

pub fn key_to_sql(part: &KeyPart) -> SqlValue {
    to_sql(&part.to_value())
}

/// Decode a stored value as `kind`
///
/// # Errors
///
/// Returns `Serialization` if the stored value does not fit the kind.
pub fn from_sql(table: &str, column: &str, kind: FieldKind, raw: SqlValue) -> Result<Value> {
    let mismatch = |raw: &SqlValue| {
        decode_error(
            table,
            column,
            format!("{:?} is not a stored {:?}", raw.data_type(), kind),
        )
    };
    let value = match (kind, raw) {
        (_, SqlValue::Null) => Value::Null,
        (FieldKind::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (FieldKind::Int, SqlValue::Integer(i)) => Value::Int(i),
        (FieldKind::Float, SqlValue::Real(f)) => Value::Float(f),
        (FieldKind::Float, SqlValue::Integer(i)) => Value::Float(i as f64),
        (FieldKind::Text, SqlValue::Text(s)) => Value::Text(s),
        (FieldKind::Bytes, SqlValue::Blob(b)) => Value::Bytes(b),
        (FieldKind::Uuid, SqlValue::Text(s)) => Uuid::parse_str(&s)
            .map(Value::Uuid)
            .map_err(|e| decode_error(table, column, e.to_string()))?,
        (FieldKind::Uuid, SqlValue::Blob(b)) => Uuid::from_slice(&b)
            .map(Value::Uuid)
            .map_err(|e| decode_error(table, column, e.to_string()))?,
        (FieldKind::Timestamp, SqlValue::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
            .map_err(|e| decode_error(table, column, e.to_string()))?,
        (FieldKind::Timestamp, SqlValue::Integer(secs)) => DateTime::from_timestamp(secs, 0)
            .map(Value::Timestamp)
            .ok_or_else(|| decode_error(table, column, "timestamp out of range"))?,
        (FieldKind::Json, SqlValue::Text(s)) => serde_json::from_str(&s)
            .map(Value::Json)
            .map_err(|e| decode_error(table, column, e.to_string()))?,
        (_, raw) => return Err(mismatch(&raw)),
    };
    Ok(value)
}

/// Kind of the single identifier of `entity_type`
///
/// # Errors
///
/// Returns `Mapping` if the type is unknown or has a composite identifier.
pub fn key_kind(registry: &MetadataRegistry, entity_type: &EntityType) -> Result<FieldKind> {
    let meta = registry.get(entity_type)?;
    match meta.id_fields.as_slice() {
        [id] => Ok(meta.require_field(id)?.kind),
        _ => Err(UnitasError::mapping(format!(
            "{} has a composite identifier and cannot be referenced",
            entity_type
        ))),
    }
}

/// Every stored column of an entity table with its kind
///
/// Fields come first, in declaration order, then the foreign-key columns of
/// owning to-one associations typed by the referenced identifier.
///
/// # Errors
///
/// Returns `Mapping` if a referenced type cannot be resolved.
pub fn column_kinds(
    registry: &MetadataRegistry,
    meta: &EntityMetadata,
) -> Result<Vec<(String, FieldKind)>> {
    let mut columns: Vec<(String, FieldKind)> = meta
        .fields
        .iter()
        .map(|f| (f.column.clone(), f.kind))
        .collect();
    for assoc in &meta.associations {
        if let Some((column, _)) = assoc.join_column() {
            if columns.iter().any(|(c, _)| c == column) {
                continue;
            }
            columns.push((column.to_string(), key_kind(registry, &assoc.target)?));
        }
    }
    Ok(columns)
}

/// Key kinds of the (owner, target) columns of a link table
///
/// # Errors
///
/// Returns `Mapping` if no association owns the link table.
pub fn link_kinds(
    registry: &MetadataRegistry,
    join: &JoinTableMetadata,
) -> Result<(FieldKind, FieldKind)> {
    for meta in registry.iter() {
        for assoc in &meta.associations {
            if assoc.join_table() == Some(join) {
                return Ok((
                    key_kind(registry, &meta.entity_type)?,
                    key_kind(registry, &assoc.target)?,
                ));
            }
        }
    }
    Err(UnitasError::mapping(format!(
        "no association owns link table '{}'",
        join.table
    )))
}

/// Decode one fetched row against its column kinds
///
/// # Errors
///
/// Returns `Serialization` if a column does not fit its kind.
pub fn decode_row(
    table: &str,
    columns: &[(String, FieldKind)],
    raw: Vec<SqlValue>,
) -> Result<Row> {
    let mut row = Row::new();
    for ((column, kind), value) in columns.iter().zip(raw) {
        row.insert(column.clone(), from_sql(table, column, *kind, value)?);
    }
    Ok(row)
}

/// Decode a link column into a key part
///
/// # Errors
///
/// Returns `Serialization` if the column is null or not a key kind.
pub fn decode_key(table: &str, column: &str, kind: FieldKind, raw: SqlValue) -> Result<KeyPart> {
    let value = from_sql(table, column, kind, raw)?;
    KeyPart::from_value(&value)
        .ok_or_else(|| decode_error(table, column, format!("{} is not a key", value.type_name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bool_and_uuid_storage_classes() {
        let id = Uuid::new_v4();
        assert_eq!(to_sql(&Value::Bool(true)), SqlValue::Integer(1));
        assert_eq!(to_sql(&Value::Uuid(id)), SqlValue::Text(id.to_string()));
        assert_eq!(
            from_sql("t", "c", FieldKind::Uuid, SqlValue::Text(id.to_string())).unwrap(),
            Value::Uuid(id)
        );
        assert_eq!(
            from_sql("t", "c", FieldKind::Uuid, SqlValue::Blob(id.as_bytes().to_vec())).unwrap(),
            Value::Uuid(id)
        );
    }

    #[test]
    fn test_timestamps_keep_subsecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        let stored = to_sql(&Value::Timestamp(at));
        assert_eq!(stored, SqlValue::Text("2024-03-01T12:30:00.250Z".to_string()));
        assert_eq!(
            from_sql("t", "c", FieldKind::Timestamp, stored).unwrap(),
            Value::Timestamp(at)
        );
    }

    #[test]
    fn test_integers_widen_to_float() {
        assert_eq!(
            from_sql("t", "c", FieldKind::Float, SqlValue::Integer(3)).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_mismatched_storage_is_a_serialization_error() {
        let err = from_sql("product", "price", FieldKind::Int, SqlValue::Text("x".into()))
            .unwrap_err();
        assert!(matches!(err, UnitasError::Serialization { .. }));
        assert!(err.to_string().contains("product.price"));

        let err = decode_key("l", "c", FieldKind::Int, SqlValue::Null).unwrap_err();
        assert!(matches!(err, UnitasError::Serialization { .. }));
    }

    #[test]
    fn test_json_round_trips_through_text() {
        let doc = serde_json::json!({"colour": "red", "sizes": [1, 2]});
        let stored = to_sql(&Value::Json(doc.clone()));
        assert_eq!(
            from_sql("t", "c", FieldKind::Json, stored).unwrap(),
            Value::Json(doc)
        );
    }
}
