//! Change detection by snapshot comparison
//!
//! Shapes tracked by snapshot never tell the context about their writes; a
//! sweep compares each tracked entry with its original-values and
//! relationship snapshots and replays what it finds as if the writes had
//! been reported.

use std::sync::Arc;
use std::time::Instant;

use crate::entry::EntityState;
use crate::errors::{Result, TrackerError};
use crate::graph::InstanceId;
use crate::model::{ChangeTrackingStrategy, ForeignKeyId, KeyId, NavigationId, PropertyId, SaveBehavior};
use crate::{log_op_end, log_op_error, log_op_start};

use super::StateManager;

impl StateManager {
    /// Diff every tracked entry of a snapshot-tracked shape
    ///
    /// # Errors
    ///
    /// - `KeyReadOnly`: a saved key was changed in place
    /// - `IdentityConflict`: an edited key collides with a tracked entry
    /// - conceptual-null failures from immediate orphan handling
    pub fn detect_changes(&mut self) -> Result<()> {
        log_op_start!("detect_changes");
        let start = Instant::now();

        let scanned = self.detect_changes_impl().map_err(|e| {
            log_op_error!(
                "detect_changes",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "detect_changes",
            duration_ms = start.elapsed().as_millis() as u64,
            entry_count = scanned
        );

        Ok(())
    }

    pub(crate) fn detect_changes_impl(&mut self) -> Result<usize> {
        let candidates: Vec<InstanceId> = self
            .entries()
            .into_iter()
            .filter(|id| {
                self.table
                    .entity_type(*id)
                    .is_some_and(|t| t.change_tracking_strategy() == ChangeTrackingStrategy::Snapshot)
            })
            .collect();
        let mut scanned = 0;
        for id in candidates {
            // an earlier entry's cascade may have detached this one
            if self.is_tracked(id) {
                self.detect_entry_changes(id)?;
                scanned += 1;
            }
        }
        Ok(scanned)
    }

    /// Diff one entry regardless of its shape's strategy
    ///
    /// # Errors
    ///
    /// See [`StateManager::detect_changes`]; `UnknownInstance` for a bad handle.
    pub fn detect_entry_changes(&mut self, id: InstanceId) -> Result<()> {
        self.table.entry(id)?;
        if !self.is_tracked(id) {
            return Ok(());
        }
        let model = Arc::clone(self.model());
        let Some(shape) = self.table.entity_type(id) else {
            return Ok(());
        };
        let properties = shape.properties().to_vec();
        let navigations = shape.navigations().to_vec();

        for p in &properties {
            let property = model.property(*p);
            if property.original_value_index().is_some()
                && !self.table.is_modified(id, *p)
                && !self.table.is_conceptual_null(id, *p)
            {
                self.detect_value_change(id, *p)?;
            }
        }
        for p in &properties {
            if model.property(*p).relationship_index().is_some() {
                self.detect_key_change(id, *p)?;
            }
        }
        for nav in navigations {
            if !self.is_tracked(id) {
                break;
            }
            self.detect_navigation_change(id, nav)?;
        }
        Ok(())
    }

    pub(crate) fn detect_value_change(&mut self, id: InstanceId, property: PropertyId) -> Result<()> {
        let current = self.table.current_value(id, property);
        if current == self.table.original_value(id, property) {
            return Ok(());
        }
        let p = self.model().property(property);
        if p.is_key()
            && p.after_save_behavior() == SaveBehavior::Throw
            && self.state(id) != EntityState::Added
        {
            return Err(TrackerError::KeyReadOnly {
                entity_type: self.entity_type_name(id),
                property: p.name().to_string(),
            });
        }
        tracing::debug!(instance = %id, property = p.name(), "property change detected");
        self.set_property_modified_core(id, property, true, true, false, false)
    }

    /// Re-index and fix up after a relationship-relevant property moved away
    /// from its relationship snapshot
    ///
    /// Index maintenance always runs; the fixup itself may be dropped when
    /// one is already in progress.
    pub(crate) fn detect_key_change(&mut self, id: InstanceId, property: PropertyId) -> Result<()> {
        let model = Arc::clone(self.model());
        let p = model.property(property);
        if p.relationship_index().is_none() || !self.is_tracked(id) {
            return Ok(());
        }
        let current = self.table.current_value(id, property);
        if self.table.relationship_value(id, property) == current {
            return Ok(());
        }
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return Ok(());
        };

        let keys: Vec<KeyId> = p.containing_keys().to_vec();
        let foreign_keys: Vec<ForeignKeyId> = p
            .containing_foreign_keys()
            .iter()
            .copied()
            .filter(|fk| model.is_assignable_from(model.foreign_key(*fk).declaring_type(), ty))
            .collect();

        for key in &keys {
            self.update_identity_map(id, *key)?;
        }
        for fk in &foreign_keys {
            self.update_dependents_map(id, *fk);
        }
        tracing::trace!(instance = %id, property = p.name(), "key change detected");

        let result = self.on_key_property_changed(id, property, &keys, &foreign_keys);
        self.table.set_relationship_value(id, property, current);
        result
    }

    pub(crate) fn detect_navigation_change(&mut self, id: InstanceId, navigation: NavigationId) -> Result<()> {
        if self.model().navigation(navigation).is_collection() {
            let snapshot = self.table.relationship_collection(id, navigation);
            let current = self.table.collection(id, navigation).to_vec();
            let added: Vec<InstanceId> = current
                .iter()
                .copied()
                .filter(|t| !snapshot.contains(t))
                .collect();
            let removed: Vec<InstanceId> = snapshot
                .iter()
                .copied()
                .filter(|t| !current.contains(t))
                .collect();
            if !added.is_empty() || !removed.is_empty() {
                tracing::trace!(
                    instance = %id,
                    added = added.len(),
                    removed = removed.len(),
                    "collection change detected"
                );
                self.on_navigation_collection_changed(id, navigation, added, removed)?;
            }
        } else {
            let snapshot = self.table.relationship_reference(id, navigation);
            let current = self.table.reference(id, navigation);
            if snapshot != current {
                tracing::trace!(instance = %id, "reference change detected");
                self.on_navigation_reference_changed(id, navigation, snapshot, current)?;
            }
        }
        Ok(())
    }
}
