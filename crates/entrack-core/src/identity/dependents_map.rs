//! Foreign-key value to dependent entries

use std::collections::{BTreeSet, HashMap};

use crate::entry::EntryTable;
use crate::graph::InstanceId;
use crate::keys::KeyValue;
use crate::model::ForeignKeyId;

/// Dependents of one foreign key, grouped by the foreign-key value they present
///
/// Each entry is remembered at the position it was last indexed under, so an
/// update can drop the stale position even after the live value changed.
#[derive(Debug, Clone)]
pub struct DependentsMap {
    foreign_key: ForeignKeyId,
    map: HashMap<KeyValue, BTreeSet<InstanceId>>,
    positions: HashMap<InstanceId, KeyValue>,
}

impl DependentsMap {
    pub fn new(foreign_key: ForeignKeyId) -> Self {
        Self {
            foreign_key,
            map: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    pub fn foreign_key(&self) -> ForeignKeyId {
        self.foreign_key
    }

    /// Index `id` under its current foreign-key value; null values are not indexed
    pub fn add(&mut self, table: &EntryTable, id: InstanceId) {
        let key = table
            .model()
            .foreign_key(self.foreign_key)
            .factory()
            .from_current(table, id);
        if let Some(key) = key {
            self.map.entry(key.clone()).or_default().insert(id);
            self.positions.insert(id, key);
        }
    }

    pub fn remove(&mut self, id: InstanceId) {
        let Some(key) = self.positions.remove(&id) else {
            return;
        };
        if let Some(bucket) = self.map.get_mut(&key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.map.remove(&key);
            }
        }
    }

    /// Move `id` from its old position to the one its current values give
    pub fn update(&mut self, table: &EntryTable, id: InstanceId) {
        self.remove(id);
        self.add(table, id);
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn dependents_for(&self, key: &KeyValue) -> Vec<InstanceId> {
        self.map
            .get(key)
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Dependents matching the principal's current key
    pub fn dependents(&self, table: &EntryTable, principal: InstanceId) -> Vec<InstanceId> {
        let model = table.model();
        let principal_key = model.foreign_key(self.foreign_key).principal_key();
        model
            .key(principal_key)
            .factory()
            .from_current(table, principal)
            .map(|key| self.dependents_for(&key))
            .unwrap_or_default()
    }

    /// Dependents matching the key the principal had before a pending key edit
    pub fn dependents_using_relationship_snapshot(
        &self,
        table: &EntryTable,
        principal: InstanceId,
    ) -> Vec<InstanceId> {
        let model = table.model();
        let principal_key = model.foreign_key(self.foreign_key).principal_key();
        model
            .key(principal_key)
            .factory()
            .from_relationship_snapshot(table, principal)
            .map(|key| self.dependents_for(&key))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
