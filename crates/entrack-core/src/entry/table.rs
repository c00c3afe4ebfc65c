//! Entry storage and member-level value access

use std::sync::Arc;

use crate::errors::{Result, TrackerError};
use crate::graph::{EntityGraph, InstanceId, MemberValue};
use crate::keys::KeyValue;
use crate::model::{
    EntityType, EntityTypeId, MemberAccess, Model, NavigationId, PropertyId, SaveBehavior, Value,
};
use crate::row::ValueBuffer;
use crate::snapshot::{Snapshot, SnapshotSource};

use super::{EntityState, PropertyFlag, TrackedEntry};

/// Instances of one tracking context together with their entries
///
/// Every instance has an entry from the moment it is created; entries of
/// instances that are not tracked sit in `Detached`.
#[derive(Debug)]
pub struct EntryTable {
    model: Arc<Model>,
    graph: EntityGraph,
    entries: Vec<TrackedEntry>,
}

/// Live members of one instance, as seen by the snapshot factories
pub struct EntryValues<'a> {
    table: &'a EntryTable,
    id: InstanceId,
}

impl SnapshotSource for EntryValues<'_> {
    fn scalar(&self, field: usize) -> Value {
        self.table.graph.scalar(self.id, field)
    }

    fn reference(&self, field: usize) -> Option<InstanceId> {
        self.table.graph.reference(self.id, field)
    }

    fn collection(&self, field: usize) -> Vec<InstanceId> {
        self.table.graph.collection(self.id, field).to_vec()
    }

    fn shadow(&self, slot: usize) -> Value {
        self.table
            .get(self.id)
            .and_then(|e| e.shadow_values.get(slot))
            .cloned()
            .unwrap_or_default()
    }
}

impl EntryTable {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            graph: EntityGraph::new(),
            entries: Vec::new(),
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub(crate) fn insert(&mut self, entity_type: EntityTypeId, notifying: bool) -> InstanceId {
        let model = Arc::clone(&self.model);
        let id = self.graph.insert(&model, entity_type, notifying);
        self.entries.push(TrackedEntry::new(
            model.entity_type(entity_type),
            &ValueBuffer::empty(),
        ));
        id
    }

    /// Materialize an instance and its shadow values from a query row
    pub(crate) fn insert_from_row(&mut self, entity_type: EntityTypeId, row: &ValueBuffer) -> InstanceId {
        let model = Arc::clone(&self.model);
        let shape = model.entity_type(entity_type);
        let notifying = shape.change_tracking_strategy().requires_notifications();
        let id = self.graph.insert(&model, entity_type, notifying);
        for p in shape.properties() {
            let property = model.property(*p);
            if let MemberAccess::Field(field) = property.access() {
                if let Some(value) = row.get(property.index()) {
                    self.graph.set_scalar(id, field, value.clone());
                }
            }
        }
        self.entries.push(TrackedEntry::new(shape, row));
        id
    }

    pub fn get(&self, id: InstanceId) -> Option<&TrackedEntry> {
        self.entries.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(id.index())
    }

    /// # Errors
    ///
    /// Returns `UnknownInstance` if `id` was not created by this context.
    pub fn entry(&self, id: InstanceId) -> Result<&TrackedEntry> {
        self.get(id).ok_or_else(|| TrackerError::UnknownInstance {
            instance: id.to_string(),
        })
    }

    pub fn state(&self, id: InstanceId) -> EntityState {
        self.get(id).map_or(EntityState::Detached, |e| e.state)
    }

    pub(crate) fn set_state(&mut self, id: InstanceId, state: EntityState) {
        if let Some(entry) = self.get_mut(id) {
            entry.state = state;
        }
    }

    pub fn entity_type(&self, id: InstanceId) -> Option<&EntityType> {
        self.get(id).map(|e| self.model.entity_type(e.entity_type))
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.graph.ids()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.graph.clear();
        self.entries.clear();
    }

    /// Undo the most recent insert
    pub(crate) fn remove_last(&mut self, id: InstanceId) {
        if self.graph.remove_last(id) {
            self.entries.pop();
        }
    }

    pub fn values(&self, id: InstanceId) -> EntryValues<'_> {
        EntryValues { table: self, id }
    }

    // ===== Scalar values =====

    /// The value held by the instance or the shadow store, ignoring any
    /// store-generated override
    pub fn raw_value(&self, id: InstanceId, property: PropertyId) -> Value {
        match self.model.property(property).access() {
            MemberAccess::Field(field) => self.graph.scalar(id, field),
            MemberAccess::Shadow(slot) => self
                .get(id)
                .and_then(|e| e.shadow_values.get(slot))
                .cloned()
                .unwrap_or_default(),
            MemberAccess::Reference(_) | MemberAccess::Collection(_) => Value::Null,
        }
    }

    /// Current value; a pending store-generated value takes precedence
    pub fn current_value(&self, id: InstanceId, property: PropertyId) -> Value {
        if let Some(slot) = self.model.property(property).store_generated_index() {
            if let Some(Some(value)) = self.get(id).and_then(|e| e.store_generated_values.get(slot)) {
                return value.clone();
            }
        }
        self.raw_value(id, property)
    }

    pub fn original_value(&self, id: InstanceId, property: PropertyId) -> Value {
        if let Some(slot) = self.model.property(property).original_value_index() {
            if let Some(value) = self.get(id).and_then(|e| e.original_values.get(slot)) {
                return value.clone();
            }
        }
        self.current_value(id, property)
    }

    /// Value as of the last relationship snapshot
    pub fn relationship_value(&self, id: InstanceId, property: PropertyId) -> Value {
        if let Some(slot) = self.model.property(property).relationship_index() {
            if let Some(MemberValue::Scalar(value)) =
                self.get(id).and_then(|e| e.relationship_snapshot.get(slot))
            {
                return value.clone();
            }
        }
        self.current_value(id, property)
    }

    pub(crate) fn write_raw(&mut self, id: InstanceId, property: PropertyId, value: Value) {
        match self.model.property(property).access() {
            MemberAccess::Field(field) => self.graph.set_scalar(id, field, value),
            MemberAccess::Shadow(slot) => {
                if let Some(entry) = self.get_mut(id) {
                    entry.shadow_values.set(slot, value);
                }
            }
            MemberAccess::Reference(_) | MemberAccess::Collection(_) => {}
        }
    }

    // ===== Navigations =====

    pub fn reference(&self, id: InstanceId, navigation: NavigationId) -> Option<InstanceId> {
        match self.model.navigation(navigation).access() {
            MemberAccess::Reference(field) => self.graph.reference(id, field),
            _ => None,
        }
    }

    pub fn collection(&self, id: InstanceId, navigation: NavigationId) -> &[InstanceId] {
        match self.model.navigation(navigation).access() {
            MemberAccess::Collection(field) => self.graph.collection(id, field),
            _ => &[],
        }
    }

    /// Every instance a navigation currently points at
    pub fn navigation_targets(&self, id: InstanceId, navigation: NavigationId) -> Vec<InstanceId> {
        if self.model.navigation(navigation).is_collection() {
            self.collection(id, navigation).to_vec()
        } else {
            self.reference(id, navigation).into_iter().collect()
        }
    }

    pub fn collection_contains(&self, id: InstanceId, navigation: NavigationId, target: InstanceId) -> bool {
        self.collection(id, navigation).contains(&target)
    }

    pub fn relationship_reference(&self, id: InstanceId, navigation: NavigationId) -> Option<InstanceId> {
        let slot = self.model.navigation(navigation).relationship_index();
        match self.get(id).and_then(|e| e.relationship_snapshot.get(slot)) {
            Some(MemberValue::Reference(target)) => *target,
            _ => self.reference(id, navigation),
        }
    }

    pub fn relationship_collection(&self, id: InstanceId, navigation: NavigationId) -> Vec<InstanceId> {
        let slot = self.model.navigation(navigation).relationship_index();
        match self.get(id).and_then(|e| e.relationship_snapshot.get(slot)) {
            Some(MemberValue::Collection(items)) => items.clone(),
            _ => self.collection(id, navigation).to_vec(),
        }
    }

    pub(crate) fn write_reference(&mut self, id: InstanceId, navigation: NavigationId, target: Option<InstanceId>) {
        if let MemberAccess::Reference(field) = self.model.navigation(navigation).access() {
            self.graph.set_reference(id, field, target);
        }
    }

    /// Append `target` unless already present; returns whether it was added
    pub(crate) fn collection_add(&mut self, id: InstanceId, navigation: NavigationId, target: InstanceId) -> bool {
        let MemberAccess::Collection(field) = self.model.navigation(navigation).access() else {
            return false;
        };
        match self.graph.collection_mut(id, field) {
            Some(items) if !items.contains(&target) => {
                items.push(target);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn collection_remove(&mut self, id: InstanceId, navigation: NavigationId, target: InstanceId) -> bool {
        let MemberAccess::Collection(field) = self.model.navigation(navigation).access() else {
            return false;
        };
        match self.graph.collection_mut(id, field) {
            Some(items) => {
                let before = items.len();
                items.retain(|i| *i != target);
                items.len() != before
            }
            None => false,
        }
    }

    // ===== Snapshots =====

    pub(crate) fn ensure_original_values(&mut self, id: InstanceId) {
        let Some(entry) = self.get(id) else {
            return;
        };
        if !entry.original_values.is_empty() {
            return;
        }
        let snapshot = self
            .model
            .entity_type(entry.entity_type)
            .snapshot_factories()
            .original_values
            .create(&self.values(id));
        if let Some(entry) = self.get_mut(id) {
            entry.original_values = snapshot;
        }
    }

    pub(crate) fn ensure_relationship_snapshot(&mut self, id: InstanceId) {
        let Some(entry) = self.get(id) else {
            return;
        };
        if !entry.relationship_snapshot.is_empty() {
            return;
        }
        let snapshot = self
            .model
            .entity_type(entry.entity_type)
            .snapshot_factories()
            .relationship
            .create(&self.values(id));
        if let Some(entry) = self.get_mut(id) {
            entry.relationship_snapshot = snapshot;
        }
    }

    /// Overwrite one original value; no-op for properties without an original slot
    pub(crate) fn set_original_slot(&mut self, id: InstanceId, property: PropertyId, value: Value) {
        let Some(slot) = self.model.property(property).original_value_index() else {
            return;
        };
        self.ensure_original_values(id);
        if let Some(entry) = self.get_mut(id) {
            entry.original_values.set(slot, value);
        }
    }

    pub(crate) fn set_relationship_value(&mut self, id: InstanceId, property: PropertyId, value: Value) {
        let Some(slot) = self.model.property(property).relationship_index() else {
            return;
        };
        self.ensure_relationship_snapshot(id);
        if let Some(entry) = self.get_mut(id) {
            entry.relationship_snapshot.set(slot, MemberValue::Scalar(value));
        }
    }

    pub(crate) fn set_relationship_reference(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: Option<InstanceId>,
    ) {
        let slot = self.model.navigation(navigation).relationship_index();
        self.ensure_relationship_snapshot(id);
        if let Some(entry) = self.get_mut(id) {
            entry.relationship_snapshot.set(slot, MemberValue::Reference(target));
        }
    }

    pub(crate) fn add_to_collection_snapshot(&mut self, id: InstanceId, navigation: NavigationId, target: InstanceId) {
        let slot = self.model.navigation(navigation).relationship_index();
        self.ensure_relationship_snapshot(id);
        if let Some(MemberValue::Collection(items)) = self
            .get_mut(id)
            .and_then(|e| e.relationship_snapshot.get_mut(slot))
        {
            if !items.contains(&target) {
                items.push(target);
            }
        }
    }

    pub(crate) fn remove_from_collection_snapshot(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: InstanceId,
    ) {
        let slot = self.model.navigation(navigation).relationship_index();
        self.ensure_relationship_snapshot(id);
        if let Some(MemberValue::Collection(items)) = self
            .get_mut(id)
            .and_then(|e| e.relationship_snapshot.get_mut(slot))
        {
            items.retain(|i| *i != target);
        }
    }

    /// Current values become the originals; an uncaptured snapshot stays uncaptured
    pub(crate) fn accept_original_values(&mut self, id: InstanceId) {
        let Some(entry) = self.get(id) else {
            return;
        };
        if entry.original_values.is_empty() {
            return;
        }
        let snapshot = self
            .model
            .entity_type(entry.entity_type)
            .snapshot_factories()
            .original_values
            .create(&self.values(id));
        if let Some(entry) = self.get_mut(id) {
            entry.original_values = snapshot;
        }
    }

    /// Properties whose current value differs from the captured original
    pub(crate) fn values_to_reject(&self, id: InstanceId) -> Vec<(PropertyId, Value)> {
        let Some(shape) = self.entity_type(id) else {
            return Vec::new();
        };
        shape
            .properties()
            .iter()
            .filter(|p| self.model.property(**p).original_value_index().is_some())
            .filter_map(|p| {
                let original = self.original_value(id, *p);
                (original != self.raw_value(id, *p)).then_some((*p, original))
            })
            .collect()
    }

    pub(crate) fn clear_snapshots(&mut self, id: InstanceId) {
        if let Some(entry) = self.get_mut(id) {
            entry.original_values = Snapshot::Empty;
            entry.relationship_snapshot = Snapshot::Empty;
            entry.store_generated_values = Snapshot::Empty;
        }
    }

    // ===== Store-generated values =====

    pub(crate) fn ensure_store_generated_values(&mut self, id: InstanceId) {
        let Some(entry) = self.get(id) else {
            return;
        };
        let count = self.model.entity_type(entry.entity_type).counts().store_generated;
        if count == 0 || !entry.store_generated_values.is_empty() {
            return;
        }
        if let Some(entry) = self.get_mut(id) {
            entry.store_generated_values = Snapshot::from_values(vec![None; count]);
        }
    }

    /// Stage a value produced by the store; false if the property is not store-generated
    pub(crate) fn set_store_generated_value(&mut self, id: InstanceId, property: PropertyId, value: Value) -> bool {
        let Some(slot) = self.model.property(property).store_generated_index() else {
            return false;
        };
        self.ensure_store_generated_values(id);
        self.get_mut(id)
            .is_some_and(|e| e.store_generated_values.set(slot, Some(value)))
    }

    /// Drain the staged values, in property order
    pub(crate) fn take_store_generated_values(&mut self, id: InstanceId) -> Vec<(PropertyId, Value)> {
        let model = Arc::clone(&self.model);
        let Some(entry) = self.get_mut(id) else {
            return Vec::new();
        };
        let staged = std::mem::take(&mut entry.store_generated_values);
        if staged.is_empty() {
            return Vec::new();
        }
        model
            .entity_type(entry.entity_type)
            .properties()
            .iter()
            .filter_map(|p| {
                let slot = model.property(*p).store_generated_index()?;
                staged.get(slot).cloned().flatten().map(|v| (*p, v))
            })
            .collect()
    }

    /// Whether the store staged a value for `property`
    pub fn has_staged_value(&self, id: InstanceId, property: PropertyId) -> bool {
        self.model
            .property(property)
            .store_generated_index()
            .is_some_and(|slot| {
                self.get(id)
                    .and_then(|e| e.store_generated_values.get(slot))
                    .is_some_and(Option::is_some)
            })
    }

    pub(crate) fn discard_store_generated_values(&mut self, id: InstanceId) {
        if let Some(entry) = self.get_mut(id) {
            entry.store_generated_values = Snapshot::Empty;
        }
    }

    // ===== Property queries =====

    pub fn is_modified(&self, id: InstanceId, property: PropertyId) -> bool {
        let ordinal = self.model.property(property).index();
        self.get(id).is_some_and(|e| {
            e.state == EntityState::Modified && e.flags.is_modified_or_temporary(ordinal)
        })
    }

    pub fn has_temporary_value(&self, id: InstanceId, property: PropertyId) -> bool {
        let ordinal = self.model.property(property).index();
        self.get(id).is_some_and(|e| {
            matches!(e.state, EntityState::Added | EntityState::Detached)
                && e.flags.is_modified_or_temporary(ordinal)
        })
    }

    pub fn is_conceptual_null(&self, id: InstanceId, property: PropertyId) -> bool {
        let ordinal = self.model.property(property).index();
        self.get(id).is_some_and(|e| e.flags.is_conceptual_null(ordinal))
    }

    pub fn has_conceptual_null(&self, id: InstanceId) -> bool {
        self.get(id).is_some_and(|e| e.flags.any(PropertyFlag::CONCEPTUAL_NULL))
    }

    /// Whether the property still holds the value an unassigned property has
    pub fn has_default_value(&self, id: InstanceId, property: PropertyId) -> bool {
        let value = self.current_value(id, property);
        value.is_null() || value == self.model.property(property).default_value()
    }

    /// Whether the store is expected to produce this property's value in the next save
    pub fn is_store_generated(&self, id: InstanceId, property: PropertyId) -> bool {
        let p = self.model.property(property);
        let state = self.state(id);
        (p.value_generated().for_add()
            && state == EntityState::Added
            && (p.before_save_behavior() == SaveBehavior::Ignore
                || self.has_temporary_value(id, property)
                || self.has_default_value(id, property)))
            || (p.value_generated().for_update()
                && state == EntityState::Modified
                && (p.after_save_behavior() == SaveBehavior::Ignore
                    || !self.is_modified(id, property)))
    }

    /// False while a generated or propagated primary key is still unresolved
    pub fn is_key_set(&self, id: InstanceId) -> bool {
        let Some(shape) = self.entity_type(id) else {
            return false;
        };
        self.model
            .key(shape.primary_key())
            .properties()
            .iter()
            .all(|p| {
                let property = self.model.property(*p);
                let derived =
                    property.value_generated().for_add() || property.is_foreign_key();
                !(derived && (self.has_temporary_value(id, *p) || self.has_default_value(id, *p)))
            })
    }

    pub fn modified_properties(&self, id: InstanceId) -> Vec<PropertyId> {
        let Some(shape) = self.entity_type(id) else {
            return Vec::new();
        };
        shape
            .properties()
            .iter()
            .copied()
            .filter(|p| self.is_modified(id, *p))
            .collect()
    }

    /// Primary key from current values
    pub fn primary_key_value(&self, id: InstanceId) -> Option<KeyValue> {
        let shape = self.entity_type(id)?;
        self.model
            .key(shape.primary_key())
            .factory()
            .from_current(self, id)
    }
}
