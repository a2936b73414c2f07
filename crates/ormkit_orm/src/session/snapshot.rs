use crate::entity::{EntityRef, PersistentEntity};
use crate::metadata::{ColumnType, EntityDescriptor};
use ormkit_core::Value;
use std::collections::HashMap;

/// Captured property values at the moment an entity became managed, or
/// after the last flush. Never observed outside the session; replaced in
/// full after a successful flush.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub columns: HashMap<String, Value>,
    pub references: HashMap<String, EntityRef>,
    pub collections: HashMap<String, Vec<EntityRef>>,
}

impl Snapshot {
    /// Read every mapped property through the accessor surface.
    pub fn take(descriptor: &EntityDescriptor, entity: &dyn PersistentEntity) -> Self {
        let mut snapshot = Snapshot::default();

        for property in descriptor.columns.keys() {
            if let Some(value) = entity.get_column(property) {
                snapshot.columns.insert(property.clone(), value);
            }
        }

        for (property, relation) in &descriptor.relations {
            if relation.is_collection() {
                if let Some(refs) = entity.get_collection(property) {
                    snapshot.collections.insert(property.clone(), refs);
                }
            } else if let Some(reference) = entity.get_reference(property) {
                snapshot.references.insert(property.clone(), reference);
            }
        }

        snapshot
    }
}

/// Compare two column values under the column's logical type semantics:
/// integers, booleans and strings by equality; floating point bit-exact;
/// temporal values by instant; blobs by length then bytes.
pub fn values_equal(column_type: ColumnType, a: &Value, b: &Value) -> bool {
    let a = normalize(column_type, a);
    let b = normalize(column_type, b);

    match (&a, &b) {
        (Value::Null, Value::Null) => true,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Bytes(x), Value::Bytes(y)) => x.len() == y.len() && x == y,
        _ => a == b,
    }
}

/// Light coercion so equivalent representations of the same stored value
/// compare equal (drivers report booleans as tinyint, for example).
fn normalize(column_type: ColumnType, value: &Value) -> Value {
    match (column_type, value) {
        (ColumnType::Boolean, Value::Int(i)) => Value::Bool(*i != 0),
        (t, Value::Bool(b)) if t.is_integer() => Value::Int(i64::from(*b)),
        (t, Value::Int(i)) if t.is_floating() => Value::Float(*i as f64),
        (ColumnType::Decimal, Value::Int(i)) => Value::Decimal(i.to_string()),
        (ColumnType::Decimal, Value::Float(f)) => Value::Decimal(f.to_string()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_compare_bit_exact() {
        assert!(values_equal(
            ColumnType::Double,
            &Value::Float(0.1),
            &Value::Float(0.1)
        ));
        assert!(!values_equal(
            ColumnType::Double,
            &Value::Float(0.1),
            &Value::Float(0.1 + f64::EPSILON)
        ));
        // NaN snapshots stay clean rather than flagging dirty every flush.
        assert!(values_equal(
            ColumnType::Double,
            &Value::Float(f64::NAN),
            &Value::Float(f64::NAN)
        ));
    }

    #[test]
    fn boolean_column_coerces_tinyint() {
        assert!(values_equal(
            ColumnType::Boolean,
            &Value::Bool(true),
            &Value::Int(1)
        ));
        assert!(!values_equal(
            ColumnType::Boolean,
            &Value::Bool(false),
            &Value::Int(1)
        ));
    }

    #[test]
    fn blobs_compare_by_length_then_bytes() {
        assert!(values_equal(
            ColumnType::Blob,
            &Value::Bytes(vec![1, 2]),
            &Value::Bytes(vec![1, 2])
        ));
        assert!(!values_equal(
            ColumnType::Blob,
            &Value::Bytes(vec![1, 2]),
            &Value::Bytes(vec![1, 2, 3])
        ));
    }

    #[test]
    fn null_only_equals_null() {
        assert!(values_equal(ColumnType::Int, &Value::Null, &Value::Null));
        assert!(!values_equal(ColumnType::Int, &Value::Null, &Value::Int(0)));
    }
}
