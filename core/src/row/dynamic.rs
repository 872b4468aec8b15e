use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::row::{
    shape::{Getter, RowDescriptor, RowShape, Setter},
    value::{ColumnValue, ConversionError, SqlValue, ValueKind},
};

/// Member name to declared type for [`DynamicRow`]s. A dynamic row carries values but no
/// types, so the shape has to be supplied by the caller.
pub type PropertyTypes = BTreeMap<String, ValueKind>;

/// A loosely typed row keyed by member name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicRow {
    values: HashMap<String, SqlValue>,
}

impl DynamicRow {
    pub fn new() -> Self {
        DynamicRow { values: HashMap::new() }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl ColumnValue) -> Self {
        self.values.insert(name.into(), value.to_sql_value());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SqlValue) -> Option<SqlValue> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for DynamicRow {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        DynamicRow { values: iter.into_iter().collect() }
    }
}

impl RowShape<DynamicRow> {
    /// Every dynamic member is nullable, a missing key reads as null.
    pub fn from_property_types(types: &PropertyTypes) -> Self {
        RowShape::from_descriptors(types.iter().map(|(name, kind)| {
            let kind = *kind;
            let key = name.clone();
            let getter: Getter<DynamicRow> = Arc::new(move |row: &DynamicRow| {
                row.values.get(&key).cloned().unwrap_or(SqlValue::Null)
            });

            let key = name.clone();
            let setter: Setter<DynamicRow> = Arc::new(
                move |row: &mut DynamicRow, value: SqlValue| -> Result<(), ConversionError> {
                    row.values.insert(key.clone(), value.coerce(kind)?);
                    Ok(())
                },
            );

            RowDescriptor::new(name.clone(), kind, true, Some(getter), Some(setter))
        }))
    }
}
