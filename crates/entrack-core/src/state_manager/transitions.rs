//! Entity state transitions
//!
//! A transition runs in a fixed order: pre-checks, property-flag updates,
//! the `state_changing` notification, original-value accept or reject, the
//! state write, identity-map membership, the changed-entry count, the
//! `state_changed` reactions and finally an immediate cascade for deletions.
//!
//! Entering `Added` first generates values. The values are planned and
//! produced before anything is written, so an async generator is awaited
//! while the context is still untouched.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::CascadeTiming;
use crate::entry::{EntityState, PropertyFlag, PropertyFlags, UpdateEntry};
use crate::errors::{Result, TrackerError};
use crate::graph::InstanceId;
use crate::model::{PropertyId, SaveBehavior, Value};
use crate::value_generation::ValueGenerator;
use crate::{log_op_end, log_op_error, log_op_start};

use super::StateManager;

enum PlannedValue {
    Known(ResolvedValue),
    Generate {
        property: PropertyId,
        generator: Arc<dyn ValueGenerator>,
    },
}

#[derive(Debug, Clone)]
struct ResolvedValue {
    property: PropertyId,
    value: Value,
    temporary: bool,
}

/// What an aborted add from Detached must put back
struct Undo {
    values: Vec<(PropertyId, Value)>,
    flags: Option<PropertyFlags>,
}

impl StateManager {
    /// Move `id` into `state`
    ///
    /// # Errors
    ///
    /// - `UnknownInstance`: `id` was not created by this context
    /// - `IdentityConflict` / `InvalidKeyValue`: the instance cannot be tracked
    /// - `MissingNotificationInterface`: push-notification shape without notifications
    /// - `TempValuePersists`: leaving Added with a temporary value still set
    /// - `ValueGeneration`: no generator for a property that needs one
    pub fn set_entity_state(&mut self, id: InstanceId, state: EntityState) -> Result<()> {
        self.set_entity_state_with(id, state, false)
    }

    /// Move `id` into `state`; with `accept_changes`, a Modified entry
    /// returning to Unchanged keeps its current values as the new originals
    /// instead of reverting to them
    ///
    /// # Errors
    ///
    /// See [`StateManager::set_entity_state`].
    pub fn set_entity_state_with(
        &mut self,
        id: InstanceId,
        state: EntityState,
        accept_changes: bool,
    ) -> Result<()> {
        log_op_start!("set_entity_state", instance = %id, new_state = %state);
        let start = Instant::now();

        let old_state = self.state(id);
        self.change_state(id, state, accept_changes, true)
            .map_err(|e| {
                log_op_error!(
                    "set_entity_state",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
                e
            })?;

        log_op_end!(
            "set_entity_state",
            duration_ms = start.elapsed().as_millis() as u64,
            old_state = %old_state,
            new_state = %state
        );

        Ok(())
    }

    /// Awaitable [`StateManager::set_entity_state`]; value generators are
    /// awaited before the context is changed
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancellation` fires before the transition is applied,
    /// otherwise see [`StateManager::set_entity_state`].
    pub async fn set_entity_state_async(
        &mut self,
        id: InstanceId,
        state: EntityState,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        log_op_start!("set_entity_state_async", instance = %id, new_state = %state);
        let start = Instant::now();

        let old_state = self.state(id);
        let result = self
            .change_state_async(id, state, false, true, cancellation)
            .await;
        if let Err(e) = &result {
            log_op_error!(
                "set_entity_state_async",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
        }
        result?;

        log_op_end!(
            "set_entity_state_async",
            duration_ms = start.elapsed().as_millis() as u64,
            old_state = %old_state,
            new_state = %state
        );

        Ok(())
    }

    pub(crate) fn change_state(
        &mut self,
        id: InstanceId,
        new_state: EntityState,
        accept_changes: bool,
        modify_properties: bool,
    ) -> Result<()> {
        let old_state = self.table.entry(id)?.state();
        let plan = if new_state == EntityState::Added && old_state != EntityState::Added {
            self.plan_values(id)?
        } else {
            Vec::new()
        };

        let model = Arc::clone(self.model());
        let mut resolved = Vec::with_capacity(plan.len());
        for planned in plan {
            resolved.push(match planned {
                PlannedValue::Known(value) => value,
                PlannedValue::Generate {
                    property,
                    generator,
                } => ResolvedValue {
                    property,
                    value: generator
                        .next(model.property(property))
                        .map_err(|e| self.named_generation_error(id, e))?,
                    temporary: generator.generates_temporary_values(),
                },
            });
        }

        self.apply_state(id, old_state, new_state, accept_changes, modify_properties, resolved)
    }

    pub(crate) async fn change_state_async(
        &mut self,
        id: InstanceId,
        new_state: EntityState,
        accept_changes: bool,
        modify_properties: bool,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(TrackerError::Cancelled {
                op: "set_entity_state_async".to_string(),
            });
        }
        let old_state = self.table.entry(id)?.state();
        let plan = if new_state == EntityState::Added && old_state != EntityState::Added {
            self.plan_values(id)?
        } else {
            Vec::new()
        };

        let model = Arc::clone(self.model());
        let mut resolved = Vec::with_capacity(plan.len());
        for planned in plan {
            match planned {
                PlannedValue::Known(value) => resolved.push(value),
                PlannedValue::Generate {
                    property,
                    generator,
                } => {
                    let value = generator
                        .next_async(model.property(property), cancellation)
                        .await
                        .map_err(|e| self.named_generation_error(id, e))?;
                    resolved.push(ResolvedValue {
                        property,
                        value,
                        temporary: generator.generates_temporary_values(),
                    });
                }
            }
        }

        if cancellation.is_cancelled() {
            return Err(TrackerError::Cancelled {
                op: "set_entity_state_async".to_string(),
            });
        }
        self.apply_state(id, old_state, new_state, accept_changes, modify_properties, resolved)
    }

    fn named_generation_error(&self, id: InstanceId, err: TrackerError) -> TrackerError {
        match err {
            TrackerError::ValueGeneration {
                entity_type,
                property,
                message,
            } if entity_type.is_empty() => TrackerError::ValueGeneration {
                entity_type: self.entity_type_name(id),
                property,
                message,
            },
            other => other,
        }
    }

    /// Values an entry entering Added receives, without writing any of them
    ///
    /// Foreign-key properties still at their default take the principal's key
    /// when a principal can be resolved; other generated key properties and
    /// properties with a registered generator get a generator.
    fn plan_values(&self, id: InstanceId) -> Result<Vec<PlannedValue>> {
        let model = Arc::clone(self.model());
        let Some(shape) = self.table.entity_type(id) else {
            return Ok(Vec::new());
        };
        let mut plan = Vec::new();
        for p in shape.properties() {
            let property = model.property(*p);
            if !self.table.has_default_value(id, *p) {
                continue;
            }
            if property.is_foreign_key() {
                if let Some((value, temporary)) = self.propagated_value(id, *p) {
                    plan.push(PlannedValue::Known(ResolvedValue {
                        property: *p,
                        value,
                        temporary,
                    }));
                    continue;
                }
            }
            let generated_key = property.value_generated().for_add()
                && property.is_key()
                && !property.is_foreign_key();
            if !generated_key && !self.generators.has_generator(*p) {
                continue;
            }
            let Some(generator) = self.generators.select(property) else {
                return Err(TrackerError::ValueGeneration {
                    entity_type: shape.name().to_string(),
                    property: property.name().to_string(),
                    message: format!("no value generator for values of kind {}", property.kind()),
                });
            };
            plan.push(PlannedValue::Generate {
                property: *p,
                generator,
            });
        }
        Ok(plan)
    }

    /// Principal key value a foreign-key property can copy, and whether it is temporary
    ///
    /// The principal is whatever the dependent's navigation points at, or
    /// failing that a tracked principal that recorded this instance as an
    /// untracked dependent.
    fn propagated_value(&self, id: InstanceId, property: PropertyId) -> Option<(Value, bool)> {
        let model = self.model();
        let ty = self.table.get(id)?.entity_type();
        for fk_id in model.property(property).containing_foreign_keys() {
            let fk = model.foreign_key(*fk_id);
            if !model.is_assignable_from(fk.declaring_type(), ty) {
                continue;
            }
            let Some(position) = fk.properties().iter().position(|p| *p == property) else {
                continue;
            };
            let principal = fk
                .dependent_to_principal()
                .and_then(|nav| self.table.reference(id, nav))
                .or_else(|| {
                    let nav = fk.principal_to_dependent()?;
                    self.danglers
                        .get(&id)?
                        .iter()
                        .find(|(_, n)| *n == nav)
                        .map(|(referrer, _)| *referrer)
                });
            let Some(principal) = principal else {
                continue;
            };
            let Some(principal_property) = model.key(fk.principal_key()).properties().get(position) else {
                continue;
            };
            if *principal_property == property {
                continue;
            }
            if self.table.has_default_value(principal, *principal_property) {
                continue;
            }
            return Some((
                self.table.current_value(principal, *principal_property),
                self.table.has_temporary_value(principal, *principal_property),
            ));
        }
        None
    }

    fn apply_state(
        &mut self,
        id: InstanceId,
        old_state: EntityState,
        new_state: EntityState,
        accept_changes: bool,
        modify_properties: bool,
        values: Vec<ResolvedValue>,
    ) -> Result<()> {
        let adding = new_state == EntityState::Added && old_state != EntityState::Added;
        let undo = (old_state == EntityState::Detached).then(|| Undo {
            values: values
                .iter()
                .map(|v| (v.property, self.table.raw_value(id, v.property)))
                .collect(),
            flags: self.table.get(id).map(|e| e.flags.clone()),
        });

        if adding {
            if old_state != EntityState::Detached {
                // key edits below are detected against this snapshot
                self.table.ensure_relationship_snapshot(id);
            }
            if let Some(entry) = self.table.get_mut(id) {
                if old_state == EntityState::Modified {
                    entry.flags.set_all(PropertyFlag::MODIFIED_OR_TEMPORARY, false);
                }
                // generated values land while the entry is outside every constraint
                entry.state = EntityState::Detached;
            }
            for v in &values {
                let written = if v.temporary {
                    self.write_temporary_value(id, v.property, v.value.clone(), true)
                } else {
                    self.set_property_internal(id, v.property, v.value.clone(), true, false)
                };
                if let Err(e) = written {
                    self.table.set_state(id, old_state);
                    return Err(e);
                }
            }
        }

        if old_state == EntityState::Detached && new_state != EntityState::Detached {
            if let Err(e) = self.check_can_track(id) {
                if let Some(undo) = undo {
                    for (property, value) in undo.values {
                        self.table.write_raw(id, property, value);
                    }
                    if let (Some(entry), Some(flags)) = (self.table.get_mut(id), undo.flags) {
                        entry.flags = flags;
                    }
                }
                self.table.set_state(id, old_state);
                return Err(e);
            }
        }

        self.set_state_core(id, old_state, new_state, accept_changes, modify_properties)?;

        // a generated or propagated key of an entry that was already indexed
        if adding && old_state != EntityState::Detached {
            for v in &values {
                self.detect_key_change(id, v.property)?;
            }
        }
        Ok(())
    }

    fn set_state_core(
        &mut self,
        id: InstanceId,
        old_state: EntityState,
        new_state: EntityState,
        accept_changes: bool,
        modify_properties: bool,
    ) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return Ok(());
        };
        let shape = model.entity_type(ty);

        if old_state == EntityState::Added
            && new_state != EntityState::Added
            && new_state != EntityState::Detached
        {
            let temporary = shape
                .properties()
                .iter()
                .find(|p| self.table.has_temporary_value(id, **p));
            if let Some(p) = temporary {
                return Err(TrackerError::TempValuePersists {
                    entity_type: shape.name().to_string(),
                    property: model.property(*p).name().to_string(),
                    state: new_state.to_string(),
                });
            }
        }

        if new_state == EntityState::Modified && modify_properties {
            if let Some(entry) = self.table.get_mut(id) {
                entry.flags.set_all(PropertyFlag::MODIFIED_OR_TEMPORARY, true);
                for p in shape.properties() {
                    let property = model.property(*p);
                    if property.after_save_behavior() != SaveBehavior::Save {
                        entry.flags.set_modified_or_temporary(property.index(), false);
                    }
                }
            }
        }

        if old_state == new_state {
            return Ok(());
        }

        if new_state == EntityState::Unchanged {
            if let Some(entry) = self.table.get_mut(id) {
                entry.flags.set_all(PropertyFlag::MODIFIED_OR_TEMPORARY, false);
            }
        }

        self.table.set_state(id, old_state);
        self.notify_state_changing(id, new_state);

        let mut rejected = Vec::new();
        if old_state == EntityState::Modified && new_state == EntityState::Unchanged {
            if accept_changes {
                self.table.accept_original_values(id);
            } else {
                rejected = self.table.values_to_reject(id);
                for (property, value) in &rejected {
                    self.table.write_raw(id, *property, value.clone());
                }
            }
        }

        self.table.set_state(id, new_state);

        if old_state == EntityState::Detached {
            self.start_tracking(id)?;
        } else if new_state == EntityState::Detached {
            self.stop_tracking(id);
            if let Some(entry) = self.table.get_mut(id) {
                let flagged: Vec<usize> = entry
                    .flags
                    .flagged(PropertyFlag::MODIFIED_OR_TEMPORARY)
                    .collect();
                entry.flags.set_all(PropertyFlag::MODIFIED_OR_TEMPORARY, false);
                if old_state == EntityState::Added {
                    for p in shape.properties() {
                        let property = model.property(*p);
                        if flagged.contains(&property.index()) {
                            self.table.write_raw(id, *p, property.default_value());
                        }
                    }
                }
            }
        }

        if matches!(new_state, EntityState::Deleted | EntityState::Detached) {
            if let Some(entry) = self.table.get_mut(id) {
                entry.flags.set_all(PropertyFlag::CONCEPTUAL_NULL, false);
            }
        }

        match (old_state.is_pending(), new_state.is_pending()) {
            (false, true) => self.changed_count += 1,
            (true, false) => self.changed_count = self.changed_count.saturating_sub(1),
            _ => {}
        }

        tracing::debug!(
            instance = %id,
            entity_type = shape.name(),
            old_state = %old_state,
            new_state = %new_state,
            "entry state changed"
        );

        for (property, _) in &rejected {
            self.detect_key_change(id, *property)?;
        }

        self.fire_state_changed(id, old_state, false)?;

        if matches!(new_state, EntityState::Deleted | EntityState::Detached)
            && self.options.cascade_delete_timing == CascadeTiming::Immediate
        {
            self.cascade_delete(id, false)?;
        }
        Ok(())
    }

    pub(crate) fn notify_state_changing(&self, id: InstanceId, new_state: EntityState) {
        if self.listeners.is_empty() {
            return;
        }
        let entry = UpdateEntry::new(&self.table, id);
        for listener in &self.listeners {
            listener.state_changing(&entry, new_state);
        }
    }

    /// Fixup reacts first, then the registered listeners
    pub(crate) fn fire_state_changed(
        &mut self,
        id: InstanceId,
        old_state: EntityState,
        from_query: bool,
    ) -> Result<()> {
        self.fixup_state_changed(id, old_state, from_query)?;
        let entry = UpdateEntry::new(&self.table, id);
        for listener in &self.listeners {
            listener.state_changed(&entry, old_state, from_query);
        }
        Ok(())
    }

    // ===== Temporary values =====

    /// Write `value` and mark it as a placeholder the store will replace
    ///
    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles; otherwise as
    /// [`StateManager::set_property`].
    pub fn set_temporary_value(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.check_property(id, property)?;
        self.write_temporary_value(id, property, value.into(), true)
    }

    /// The temporary mark only exists while the entry is Added or Detached;
    /// in any other state the value is written as a plain value
    pub(crate) fn write_temporary_value(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        value: Value,
        set_modified: bool,
    ) -> Result<()> {
        self.set_property_internal(id, property, value, set_modified, false)?;
        if matches!(self.state(id), EntityState::Added | EntityState::Detached) {
            let ordinal = self.model().property(property).index();
            if let Some(entry) = self.table.get_mut(id) {
                entry.flags.set_modified_or_temporary(ordinal, true);
            }
        }
        Ok(())
    }

    /// Set or clear the temporary mark without touching the value
    ///
    /// Ignored unless the entry is Added or Detached.
    ///
    /// # Errors
    ///
    /// `UnknownInstance` / `UnknownMember` for bad handles.
    pub fn mark_as_temporary(&mut self, id: InstanceId, property: PropertyId, temporary: bool) -> Result<()> {
        self.check_property(id, property)?;
        if !matches!(self.state(id), EntityState::Added | EntityState::Detached) {
            tracing::debug!(instance = %id, "temporary mark ignored outside Added");
            return Ok(());
        }
        let ordinal = self.model().property(property).index();
        if let Some(entry) = self.table.get_mut(id) {
            entry.flags.set_modified_or_temporary(ordinal, temporary);
        }
        Ok(())
    }
}
