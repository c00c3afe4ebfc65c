//! Read-only view of a pending entry handed to the persistence step

use crate::graph::InstanceId;
use crate::keys::KeyValue;
use crate::model::{EntityType, PropertyId, Value};

use super::{EntityState, EntryTable};

/// What an external batching step needs to build an insert, update or delete
#[derive(Clone, Copy)]
pub struct UpdateEntry<'a> {
    table: &'a EntryTable,
    id: InstanceId,
}

impl<'a> UpdateEntry<'a> {
    pub(crate) fn new(table: &'a EntryTable, id: InstanceId) -> Self {
        Self { table, id }
    }

    pub fn instance(&self) -> InstanceId {
        self.id
    }

    pub fn entity_type(&self) -> Option<&'a EntityType> {
        self.table.entity_type(self.id)
    }

    pub fn state(&self) -> EntityState {
        self.table.state(self.id)
    }

    pub fn current_value(&self, property: PropertyId) -> Value {
        self.table.current_value(self.id, property)
    }

    pub fn original_value(&self, property: PropertyId) -> Value {
        self.table.original_value(self.id, property)
    }

    pub fn is_modified(&self, property: PropertyId) -> bool {
        self.table.is_modified(self.id, property)
    }

    pub fn has_temporary_value(&self, property: PropertyId) -> bool {
        self.table.has_temporary_value(self.id, property)
    }

    pub fn is_store_generated(&self, property: PropertyId) -> bool {
        self.table.is_store_generated(self.id, property)
    }

    pub fn is_conceptual_null(&self, property: PropertyId) -> bool {
        self.table.is_conceptual_null(self.id, property)
    }

    pub fn modified_properties(&self) -> Vec<PropertyId> {
        self.table.modified_properties(self.id)
    }

    pub fn is_key_set(&self) -> bool {
        self.table.is_key_set(self.id)
    }

    pub fn key(&self) -> Option<KeyValue> {
        self.table.primary_key_value(self.id)
    }

    /// Property by name, including inherited ones
    pub fn find_property(&self, name: &str) -> Option<PropertyId> {
        let shape = self.entity_type()?;
        self.table.model().find_property(shape.id(), name)
    }
}

impl std::fmt::Debug for UpdateEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEntry")
            .field("instance", &self.id)
            .field("entity_type", &self.entity_type().map(|t| t.name()))
            .field("state", &self.state())
            .finish()
    }
}
