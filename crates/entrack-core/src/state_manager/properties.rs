//! Member writes
//!
//! Two doors lead to the same members:
//! - `write_*` behave like application code assigning a field; the context
//!   hears about it at once only when the instance provides notifications,
//!   otherwise `detect_changes` discovers it later
//! - `set_*` and `add_to_collection`/`remove_from_collection` are entry-level
//!   operations and always notify the context

use std::sync::Arc;

use crate::entry::{EntityState, PropertyFlag};
use crate::errors::{Result, TrackerError};
use crate::graph::InstanceId;
use crate::model::{NavigationId, PropertyId, SaveBehavior, Value};

use super::StateManager;

impl StateManager {
    pub(crate) fn check_property(&self, id: InstanceId, property: PropertyId) -> Result<()> {
        let ty = self.table.entry(id)?.entity_type();
        let present = self.model().has_property(ty, property);
        self.check_member(id, &format!("property #{}", property.index()), present)
    }

    pub(crate) fn check_navigation(&self, id: InstanceId, navigation: NavigationId) -> Result<()> {
        let ty = self.table.entry(id)?.entity_type();
        let present = self.model().has_navigation(ty, navigation);
        self.check_member(id, &format!("navigation #{}", navigation.index()), present)
    }

    fn notifies(&self, id: InstanceId) -> bool {
        self.table
            .graph()
            .get(id)
            .is_some_and(|i| i.provides_notifications())
    }

    // ===== Application-side writes =====

    /// Assign a scalar member as application code would
    ///
    /// Shadow properties have no application-side storage and are set through
    /// the entry instead.
    ///
    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles; for notifying
    /// instances, anything the immediate change handling reports.
    pub fn write_property(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.check_property(id, property)?;
        let value = value.into();
        if self.model().property(property).is_shadow() {
            return self.set_property_internal(id, property, value, true, false);
        }
        if !self.notifies(id) {
            self.table.write_raw(id, property, value);
            return Ok(());
        }
        if self.table.raw_value(id, property) == value {
            return Ok(());
        }
        self.property_changing(id, property);
        self.table.write_raw(id, property, value);
        self.property_changed(id, property, true)
    }

    /// Point a single-valued navigation at `target` as application code would
    ///
    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles.
    pub fn write_reference(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: Option<InstanceId>,
    ) -> Result<()> {
        self.set_reference_core(id, navigation, target, self.notifies(id))
    }

    /// Append to a collection navigation as application code would
    ///
    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles.
    pub fn write_collection_add(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: InstanceId,
    ) -> Result<()> {
        self.collection_add_core(id, navigation, target, self.notifies(id))
    }

    /// Remove from a collection navigation as application code would
    ///
    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles.
    pub fn write_collection_remove(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: InstanceId,
    ) -> Result<()> {
        self.collection_remove_core(id, navigation, target, self.notifies(id))
    }

    // ===== Entry-level writes =====

    /// Set the current value of a property and react to the change
    ///
    /// Assigning null to a property that cannot hold it flags a conceptual
    /// null instead of writing.
    ///
    /// # Errors
    ///
    /// - `UnknownInstance` / `UnknownMember` for bad handles
    /// - `KeyReadOnly`: changing a key of a tracked, non-Added entry
    /// - `IdentityConflict`: the new key value is already tracked
    /// - `RelationshipConceptualNull` / `PropertyConceptualNull`: an immediate
    ///   orphan check failed
    pub fn set_property(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.check_property(id, property)?;
        self.set_property_internal(id, property, value.into(), true, false)
    }

    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles.
    pub fn set_reference(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: Option<InstanceId>,
    ) -> Result<()> {
        self.set_reference_core(id, navigation, target, true)
    }

    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles.
    pub fn add_to_collection(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: InstanceId,
    ) -> Result<()> {
        self.collection_add_core(id, navigation, target, true)
    }

    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles.
    pub fn remove_from_collection(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: InstanceId,
    ) -> Result<()> {
        self.collection_remove_core(id, navigation, target, true)
    }

    /// Mark or unmark a property as modified
    ///
    /// Unmarking restores the original value.
    ///
    /// # Errors
    ///
    /// `KeyReadOnly` when marking a key property; bad handles as usual.
    pub fn set_property_modified(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        modified: bool,
    ) -> Result<()> {
        self.check_property(id, property)?;
        self.set_property_modified_core(id, property, true, modified, false, false)
    }

    /// Overwrite the original value; an Unchanged entry whose current value
    /// now differs becomes Modified
    ///
    /// # Errors
    ///
    /// `InvalidModel` if the shape keeps no original value for the property.
    pub fn set_original_value(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.check_property(id, property)?;
        let model = Arc::clone(self.model());
        let p = model.property(property);
        if p.original_value_index().is_none() {
            return Err(TrackerError::InvalidModel {
                reason: format!(
                    "the original value of '{}' on '{}' is not tracked",
                    p.name(),
                    self.entity_type_name(id)
                ),
            });
        }
        self.table.set_original_slot(id, property, value.into());
        let state = self.state(id);
        if state == EntityState::Unchanged
            || (state == EntityState::Modified && !self.table.is_modified(id, property))
        {
            self.detect_value_change(id, property)?;
        }
        Ok(())
    }

    // ===== Internals =====

    fn set_reference_core(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: Option<InstanceId>,
        notify: bool,
    ) -> Result<()> {
        self.check_navigation(id, navigation)?;
        if let Some(target) = target {
            self.table.entry(target)?;
        }
        if self.model().navigation(navigation).is_collection() {
            return Err(TrackerError::UnknownMember {
                entity_type: self.entity_type_name(id),
                member: self.model().navigation(navigation).name().to_string(),
            });
        }
        if notify {
            self.navigation_changing(id);
        }
        self.table.write_reference(id, navigation, target);
        if notify {
            self.navigation_changed(id, navigation)?;
        }
        Ok(())
    }

    fn collection_add_core(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: InstanceId,
        notify: bool,
    ) -> Result<()> {
        self.check_navigation(id, navigation)?;
        self.table.entry(target)?;
        if notify {
            self.navigation_changing(id);
        }
        if self.table.collection_add(id, navigation, target) && notify && self.should_notify(id) {
            self.on_navigation_collection_changed(id, navigation, vec![target], Vec::new())?;
        }
        Ok(())
    }

    fn collection_remove_core(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        target: InstanceId,
        notify: bool,
    ) -> Result<()> {
        self.check_navigation(id, navigation)?;
        self.table.entry(target)?;
        if notify {
            self.navigation_changing(id);
        }
        if self.table.collection_remove(id, navigation, target) && notify && self.should_notify(id) {
            self.on_navigation_collection_changed(id, navigation, Vec::new(), vec![target])?;
        }
        Ok(())
    }

    fn should_notify(&self, id: InstanceId) -> bool {
        self.detection_suspended == 0 && self.is_tracked(id)
    }

    fn navigation_changing(&mut self, id: InstanceId) {
        if !self.should_notify(id) {
            return;
        }
        let lazy = self
            .table
            .entity_type(id)
            .is_some_and(|t| !t.change_tracking_strategy().uses_eager_snapshots());
        if lazy {
            self.table.ensure_relationship_snapshot(id);
        }
    }

    fn navigation_changed(&mut self, id: InstanceId, navigation: NavigationId) -> Result<()> {
        if !self.should_notify(id) {
            return Ok(());
        }
        self.detect_navigation_change(id, navigation)
    }

    /// Write a property through the full change pipeline
    pub(crate) fn set_property_internal(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        value: Value,
        set_modified: bool,
        is_cascade_delete: bool,
    ) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return Ok(());
        };
        let p = model.property(property);
        let ordinal = p.index();
        let null_flagged = self.table.is_conceptual_null(id, property);
        if self.table.current_value(id, property) == value && !null_flagged {
            return Ok(());
        }

        let conceptual_null_candidate = !p.is_nullable()
            || p.containing_foreign_keys().iter().any(|fk| {
                let fk = model.foreign_key(*fk);
                fk.delete_behavior().is_cascading() && model.is_assignable_from(fk.declaring_type(), ty)
            });
        if conceptual_null_candidate {
            if value.is_null() {
                let state = self.state(id);
                if state != EntityState::Deleted && state != EntityState::Detached {
                    if let Some(entry) = self.table.get_mut(id) {
                        entry.flags.set_conceptual_null(ordinal, true);
                    }
                    tracing::debug!(instance = %id, property = p.name(), "conceptual null");
                    if set_modified {
                        self.set_property_modified_core(id, property, true, true, true, false)?;
                    }
                    if !is_cascade_delete
                        && self.options.delete_orphans_timing == crate::config::CascadeTiming::Immediate
                    {
                        self.handle_conceptual_nulls(id, false, false)?;
                    }
                }
                return Ok(());
            }
            if let Some(entry) = self.table.get_mut(id) {
                entry.flags.set_conceptual_null(ordinal, false);
            }
        }

        if p.is_key() && self.is_tracked(id) {
            self.check_key_edit(id, property, &value)?;
        }

        self.property_changing(id, property);
        self.table.write_raw(id, property, value);
        if matches!(self.state(id), EntityState::Added | EntityState::Detached) {
            // a real value replaces a temporary one
            if let Some(entry) = self.table.get_mut(id) {
                entry.flags.set_modified_or_temporary(ordinal, false);
            }
        }
        self.property_changed(id, property, set_modified)
    }

    /// Reject a key edit that would collide with another tracked entry,
    /// before anything is written
    fn check_key_edit(&self, id: InstanceId, property: PropertyId, value: &Value) -> Result<()> {
        let model = self.model();
        for key_id in model.property(property).containing_keys() {
            let key = model.key(*key_id);
            let values: Vec<Value> = key
                .properties()
                .iter()
                .map(|p| {
                    if *p == property {
                        value.clone()
                    } else {
                        self.table.current_value(id, *p)
                    }
                })
                .collect();
            let Some(candidate) = key.factory().try_create(values) else {
                continue;
            };
            let occupant = self
                .identity_maps
                .get(key_id)
                .and_then(|map| map.try_get(&candidate));
            if let Some(occupant) = occupant.filter(|o| *o != id) {
                return Err(TrackerError::IdentityConflict {
                    entity_type: self.entity_type_name(occupant),
                    key: entrack_core_types::Sensitive::new(&candidate)
                        .render(self.options.sensitive_data_logging),
                });
            }
        }
        Ok(())
    }

    /// Capture snapshots a lazily snapshotted shape needs before a write
    pub(crate) fn property_changing(&mut self, id: InstanceId, property: PropertyId) {
        if !self.should_notify(id) {
            return;
        }
        let model = Arc::clone(self.model());
        let lazy = self
            .table
            .entity_type(id)
            .is_some_and(|t| !t.change_tracking_strategy().uses_eager_snapshots());
        if !lazy {
            return;
        }
        let p = model.property(property);
        if p.original_value_index().is_some() {
            self.table.ensure_original_values(id);
        }
        if p.relationship_index().is_some() {
            self.table.ensure_relationship_snapshot(id);
        }
    }

    pub(crate) fn property_changed(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        set_modified: bool,
    ) -> Result<()> {
        if !self.should_notify(id) {
            return Ok(());
        }
        if self.state(id) == EntityState::Deleted {
            self.throw_if_key_changed(id, property)?;
        } else {
            self.set_property_modified_core(id, property, set_modified, true, false, false)?;
        }
        self.detect_key_change(id, property)
    }

    fn throw_if_key_changed(&self, id: InstanceId, property: PropertyId) -> Result<()> {
        let p = self.model().property(property);
        if p.is_key() && p.after_save_behavior() == SaveBehavior::Throw {
            return Err(TrackerError::KeyReadOnly {
                entity_type: self.entity_type_name(id),
                property: p.name().to_string(),
            });
        }
        Ok(())
    }

    /// Modified-flag bookkeeping after a property write or an explicit mark
    ///
    /// With `change_state`, the entry moves between Unchanged and Modified as
    /// its first property becomes modified or its last one stops being so.
    pub(crate) fn set_property_modified_core(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        change_state: bool,
        is_modified: bool,
        is_conceptual_null: bool,
        accept_changes: bool,
    ) -> Result<()> {
        let model = Arc::clone(self.model());
        let p = model.property(property);
        let ordinal = p.index();
        let state = self.state(id);

        if matches!(state, EntityState::Added | EntityState::Detached) || !change_state {
            if p.original_value_index().is_some() && !self.table.is_conceptual_null(id, property) {
                let current = self.table.current_value(id, property);
                self.table.set_original_slot(id, property, current);
            }
            if state == EntityState::Added {
                return Ok(());
            }
        }

        if change_state
            && !is_conceptual_null
            && is_modified
            && p.is_key()
            && p.after_save_behavior() == SaveBehavior::Throw
        {
            return Err(TrackerError::KeyReadOnly {
                entity_type: self.entity_type_name(id),
                property: p.name().to_string(),
            });
        }

        if state == EntityState::Deleted {
            return Ok(());
        }

        if change_state {
            if !is_modified && state != EntityState::Detached && p.original_value_index().is_some() {
                if accept_changes {
                    let current = self.table.current_value(id, property);
                    self.table.set_original_slot(id, property, current);
                }
                let original = self.table.original_value(id, property);
                self.set_property_internal(id, property, original, false, false)?;
            }
            if let Some(entry) = self.table.get_mut(id) {
                entry.flags.set_modified_or_temporary(ordinal, is_modified);
            }
        }

        if is_modified && matches!(state, EntityState::Unchanged | EntityState::Detached) {
            if change_state {
                if state == EntityState::Detached {
                    self.check_can_track(id)?;
                }
                self.notify_state_changing(id, EntityState::Modified);
                self.table.set_state(id, EntityState::Modified);
                if state == EntityState::Detached {
                    self.start_tracking(id)?;
                }
                self.changed_count += 1;
                self.fire_state_changed(id, state, false)?;
            }
        } else if state == EntityState::Modified
            && change_state
            && !is_modified
            && !self
                .table
                .get(id)
                .is_some_and(|e| e.flags.any(PropertyFlag::MODIFIED_OR_TEMPORARY))
        {
            self.notify_state_changing(id, EntityState::Unchanged);
            self.table.set_state(id, EntityState::Unchanged);
            self.changed_count = self.changed_count.saturating_sub(1);
            self.fire_state_changed(id, EntityState::Modified, false)?;
        }
        Ok(())
    }
}
