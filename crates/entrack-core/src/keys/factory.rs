//! Key-value extraction for the principal and dependent roles of a key

use crate::entry::EntryTable;
use crate::errors::{Result, TrackerError};
use crate::graph::InstanceId;
use crate::model::{Property, PropertyId, Value, ValueKind};
use crate::row::ValueBuffer;

use super::{KeyShape, KeyValue};

/// Reads a key value out of a row, an entry's current or original values, or
/// its relationship snapshot
///
/// Built once per key (principal role) and once per foreign key (dependent
/// role). Construction fails, returning `None`, when any component is null.
#[derive(Debug, Clone)]
pub struct KeyValueFactory {
    shape: KeyShape,
    properties: Vec<PropertyId>,
    names: Vec<String>,
    ordinals: Vec<usize>,
    kinds: Vec<ValueKind>,
}

impl KeyValueFactory {
    pub(crate) fn new(shape: KeyShape, properties: &[&Property]) -> Self {
        Self {
            shape,
            properties: properties.iter().map(|p| p.id()).collect(),
            names: properties.iter().map(|p| p.name().to_string()).collect(),
            ordinals: properties.iter().map(|p| p.index()).collect(),
            kinds: properties.iter().map(|p| p.kind()).collect(),
        }
    }

    pub fn shape(&self) -> KeyShape {
        self.shape
    }

    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    /// Build a key from component values in property order
    pub fn try_create(&self, mut values: Vec<Value>) -> Option<KeyValue> {
        if values.len() != self.properties.len() {
            return None;
        }
        match self.shape {
            KeyShape::Simple => match values.pop() {
                Some(Value::Null) | None => None,
                Some(v) => Some(KeyValue::Simple(v)),
            },
            KeyShape::Composite => KeyValue::try_from_values(values),
        }
    }

    /// Key from a materialized row, checking each column's kind
    ///
    /// # Errors
    ///
    /// Returns `KeyTypeMismatch` when a non-null column holds a value of a
    /// different kind than the key property.
    pub fn from_row(&self, row: &ValueBuffer, entity_type: &str) -> Result<Option<KeyValue>> {
        let mut values = Vec::with_capacity(self.ordinals.len());
        for ((ordinal, expected), name) in self.ordinals.iter().zip(&self.kinds).zip(&self.names) {
            let value = row.get(*ordinal).cloned().unwrap_or_default();
            if let Some(actual) = value.kind() {
                if actual != *expected {
                    return Err(TrackerError::KeyTypeMismatch {
                        entity_type: entity_type.to_string(),
                        property: name.clone(),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
            values.push(value);
        }
        Ok(self.try_create(values))
    }

    pub fn from_current(&self, table: &EntryTable, id: InstanceId) -> Option<KeyValue> {
        self.try_create(
            self.properties
                .iter()
                .map(|p| table.current_value(id, *p))
                .collect(),
        )
    }

    pub fn from_original(&self, table: &EntryTable, id: InstanceId) -> Option<KeyValue> {
        self.try_create(
            self.properties
                .iter()
                .map(|p| table.original_value(id, *p))
                .collect(),
        )
    }

    /// Key as of the last relationship snapshot, i.e. before a pending key edit
    pub fn from_relationship_snapshot(&self, table: &EntryTable, id: InstanceId) -> Option<KeyValue> {
        self.try_create(
            self.properties
                .iter()
                .map(|p| table.relationship_value(id, *p))
                .collect(),
        )
    }
}
