//! Key value to tracked entry

use std::collections::HashMap;

use entrack_core_types::Sensitive;

use crate::entry::EntryTable;
use crate::errors::{Result, TrackerError};
use crate::graph::InstanceId;
use crate::keys::KeyValue;
use crate::model::{ForeignKeyId, KeyId, Value};

use super::DependentsMap;

/// At most one entry per key value of one key
#[derive(Debug, Clone)]
pub struct IdentityMap {
    key: KeyId,
    allow_null_keys: bool,
    sensitive_data_logging: bool,
    map: HashMap<KeyValue, InstanceId>,
    dependents_maps: HashMap<ForeignKeyId, DependentsMap>,
}

impl IdentityMap {
    pub fn new(key: KeyId, allow_null_keys: bool, sensitive_data_logging: bool) -> Self {
        Self {
            key,
            allow_null_keys,
            sensitive_data_logging,
            map: HashMap::new(),
            dependents_maps: HashMap::new(),
        }
    }

    pub fn key(&self) -> KeyId {
        self.key
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn try_get(&self, key: &KeyValue) -> Option<InstanceId> {
        self.map.get(key).copied()
    }

    /// Lookup by component values in key-property order; null components find nothing
    pub fn try_get_by_values(&self, table: &EntryTable, values: Vec<Value>) -> Option<InstanceId> {
        table
            .model()
            .key(self.key)
            .factory()
            .try_create(values)
            .and_then(|k| self.try_get(&k))
    }

    /// Whether `id` is indexed, under its current key or, after an
    /// unprocessed key edit, its relationship-snapshot key
    pub fn contains(&self, table: &EntryTable, id: InstanceId) -> bool {
        let factory = table.model().key(self.key).factory();
        [
            factory.from_current(table, id),
            factory.from_relationship_snapshot(table, id),
        ]
        .into_iter()
        .flatten()
        .any(|key| self.try_get(&key) == Some(id))
    }

    pub fn entries(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.map.values().copied()
    }

    fn conflict(&self, table: &EntryTable, id: InstanceId, key: &KeyValue) -> TrackerError {
        TrackerError::IdentityConflict {
            entity_type: table
                .entity_type(id)
                .map(|t| t.name().to_string())
                .unwrap_or_default(),
            key: Sensitive::new(key).render(self.sensitive_data_logging),
        }
    }

    /// Key `id` would be indexed under, validated against the map without changing it
    ///
    /// Returns `Ok(None)` when the key is null and null keys are allowed.
    ///
    /// # Errors
    ///
    /// `InvalidKeyValue` for a null key when null keys are not allowed;
    /// `IdentityConflict` when another entry holds the same key.
    pub fn check_add(&self, table: &EntryTable, id: InstanceId) -> Result<Option<KeyValue>> {
        let model = table.model();
        let key = model.key(self.key);
        let Some(value) = key.factory().from_current(table, id) else {
            if self.allow_null_keys {
                return Ok(None);
            }
            return Err(TrackerError::InvalidKeyValue {
                entity_type: table
                    .entity_type(id)
                    .map(|t| t.name().to_string())
                    .unwrap_or_default(),
                properties: model.display_properties(key.properties()),
            });
        };
        match self.map.get(&value) {
            Some(existing) if *existing != id => Err(self.conflict(table, id, &value)),
            _ => Ok(Some(value)),
        }
    }

    /// Index `id`; adding the same entry under the same key again is a no-op
    ///
    /// # Errors
    ///
    /// See [`IdentityMap::check_add`].
    pub fn add(&mut self, table: &EntryTable, id: InstanceId) -> Result<()> {
        let Some(key) = self.check_add(table, id)? else {
            return Ok(());
        };
        if self.map.insert(key, id).is_none() {
            tracing::trace!(instance = %id, key = ?self.key, "identity map add");
        }
        self.add_to_dependents_maps(table, id);
        Ok(())
    }

    fn add_to_dependents_maps(&mut self, table: &EntryTable, id: InstanceId) {
        let model = table.model();
        let Some(ty) = table.get(id).map(|e| e.entity_type()) else {
            return;
        };
        for map in self.dependents_maps.values_mut() {
            let fk = model.foreign_key(map.foreign_key());
            if model.is_assignable_from(fk.declaring_type(), ty) {
                map.add(table, id);
            }
        }
    }

    fn remove_key(&mut self, key: Option<KeyValue>, id: InstanceId) -> bool {
        match key {
            Some(key) if self.map.get(&key) == Some(&id) => {
                self.map.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Remove by the entry's current key, falling back to its relationship snapshot key
    pub fn remove(&mut self, table: &EntryTable, id: InstanceId) {
        let factory = table.model().key(self.key).factory();
        if !self.remove_key(factory.from_current(table, id), id) {
            self.remove_key(factory.from_relationship_snapshot(table, id), id);
        }
        for map in self.dependents_maps.values_mut() {
            map.remove(id);
        }
    }

    /// Remove by the key the entry had before its pending key edit
    pub fn remove_using_relationship_snapshot(&mut self, table: &EntryTable, id: InstanceId) {
        let factory = table.model().key(self.key).factory();
        self.remove_key(factory.from_relationship_snapshot(table, id), id);
        for map in self.dependents_maps.values_mut() {
            map.remove(id);
        }
    }

    /// Re-index an entry whose key changed after it was tracked
    ///
    /// # Errors
    ///
    /// See [`IdentityMap::check_add`]; on error the map is unchanged.
    pub fn update(&mut self, table: &EntryTable, id: InstanceId) -> Result<()> {
        let new_key = self.check_add(table, id)?;
        self.remove_using_relationship_snapshot(table, id);
        if let Some(key) = new_key {
            self.map.insert(key, id);
        }
        self.add_to_dependents_maps(table, id);
        Ok(())
    }

    /// Dependents map of `foreign_key`, seeded from current membership on first use
    pub fn dependents_map(&mut self, table: &EntryTable, foreign_key: ForeignKeyId) -> &DependentsMap {
        let model = table.model();
        let map = &self.map;
        self.dependents_maps.entry(foreign_key).or_insert_with(|| {
            let declaring = model.foreign_key(foreign_key).declaring_type();
            let mut dependents = DependentsMap::new(foreign_key);
            let mut members: Vec<InstanceId> = map.values().copied().collect();
            members.sort();
            for id in members {
                let assignable = table
                    .get(id)
                    .is_some_and(|e| model.is_assignable_from(declaring, e.entity_type()));
                if assignable {
                    dependents.add(table, id);
                }
            }
            tracing::trace!(foreign_key = ?foreign_key, seeded = dependents.len(), "dependents map built");
            dependents
        })
    }

    pub fn find_dependents_map(&self, foreign_key: ForeignKeyId) -> Option<&DependentsMap> {
        self.dependents_maps.get(&foreign_key)
    }

    /// Move `id` within an already-built dependents map
    pub fn update_dependent(&mut self, table: &EntryTable, foreign_key: ForeignKeyId, id: InstanceId) {
        if let Some(map) = self.dependents_maps.get_mut(&foreign_key) {
            map.update(table, id);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.dependents_maps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::model::{EntityTypeId, ModelBuilder, PropertyId, ValueKind};

    fn setup() -> (EntryTable, EntityTypeId, PropertyId, KeyId) {
        let mut b = ModelBuilder::new();
        let t = b.entity("Blog");
        let id = b.property(t, "Id", ValueKind::Int).nullable().build();
        let pk = b.primary_key(t, &[id]);
        let model = Arc::new(b.finish().unwrap());
        (EntryTable::new(model), t, id, pk)
    }

    #[test]
    fn test_same_instance_twice_is_noop() {
        let (mut table, t, id, pk) = setup();
        let a = table.insert(t, false);
        table.write_raw(a, id, Value::Int(1));
        let mut map = IdentityMap::new(pk, false, false);
        map.add(&table, a).unwrap();
        map.add(&table, a).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains(&table, a));
    }

    #[test]
    fn test_contains_is_keyed() {
        let (mut table, t, id, pk) = setup();
        let a = table.insert(t, false);
        let b = table.insert(t, false);
        table.write_raw(a, id, Value::Int(1));
        table.write_raw(b, id, Value::Int(1));
        let mut map = IdentityMap::new(pk, false, false);
        map.add(&table, a).unwrap();

        // same key value, different instance
        assert!(!map.contains(&table, b));
    }

    #[test]
    fn test_conflict_names_type_and_redacts_key() {
        let (mut table, t, id, pk) = setup();
        let a = table.insert(t, false);
        let b = table.insert(t, false);
        table.write_raw(a, id, Value::Int(1));
        table.write_raw(b, id, Value::Int(1));
        let mut map = IdentityMap::new(pk, false, false);
        map.add(&table, a).unwrap();

        let err = map.add(&table, b).unwrap_err();
        match err {
            TrackerError::IdentityConflict { entity_type, key } => {
                assert_eq!(entity_type, "Blog");
                assert_eq!(key, "***REDACTED***");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(map.try_get(&KeyValue::Simple(Value::Int(1))), Some(a));
    }

    #[test]
    fn test_sensitive_logging_renders_key() {
        let (mut table, t, id, pk) = setup();
        let a = table.insert(t, false);
        let b = table.insert(t, false);
        table.write_raw(a, id, Value::Int(7));
        table.write_raw(b, id, Value::Int(7));
        let mut map = IdentityMap::new(pk, false, true);
        map.add(&table, a).unwrap();
        let err = map.add(&table, b).unwrap_err();
        assert!(err.to_string().contains("7"));
    }

    #[test]
    fn test_null_key_rejected_unless_allowed() {
        let (mut table, t, _, pk) = setup();
        let a = table.insert(t, false);

        let mut strict = IdentityMap::new(pk, false, false);
        let err = strict.add(&table, a).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidKeyValue { .. }));

        let mut lenient = IdentityMap::new(pk, true, false);
        lenient.add(&table, a).unwrap();
        assert!(lenient.is_empty());
    }

    #[test]
    fn test_update_moves_key_and_remove_uses_snapshot() {
        let (mut table, t, id, pk) = setup();
        let a = table.insert(t, false);
        table.write_raw(a, id, Value::Int(1));
        table.ensure_relationship_snapshot(a);
        let mut map = IdentityMap::new(pk, false, false);
        map.add(&table, a).unwrap();

        table.write_raw(a, id, Value::Int(2));
        // still indexed under the snapshot key until updated
        assert!(map.contains(&table, a));
        map.update(&table, a).unwrap();
        assert_eq!(map.try_get(&KeyValue::Simple(Value::Int(1))), None);
        assert_eq!(map.try_get_by_values(&table, vec![Value::Int(2)]), Some(a));

        table.set_relationship_value(a, id, Value::Int(2));
        table.write_raw(a, id, Value::Int(3));
        map.remove(&table, a);
        assert!(map.is_empty());
    }
}
