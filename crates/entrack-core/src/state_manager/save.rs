//! Save orchestration
//!
//! A save collects the pending entries, checks them, hands them to a
//! [`StoreApplier`], stages what the store generated and finally accepts
//! the changes. Nothing is accepted when the store step fails.

use std::sync::Arc;
use std::time::Instant;

use entrack_core_types::{RequestContext, TraceId};
use tokio_util::sync::CancellationToken;

use crate::entry::{EntityState, UpdateEntry};
use crate::errors::{ExError, Result, TrackerError};
use crate::graph::InstanceId;
use crate::hooks::{StoreApplier, StoreResult};
use crate::model::{PropertyId, SaveBehavior, Value};
use crate::{log_op_end, log_op_error, log_op_start};

use super::StateManager;

const PENDING: [EntityState; 3] = [EntityState::Added, EntityState::Modified, EntityState::Deleted];

impl StateManager {
    /// Pending entries, checked and ready for the store
    ///
    /// With `cascade_changes`, deferred cascades run first.
    ///
    /// # Errors
    ///
    /// - `PropertyReadOnlyBeforeSave` / `PropertyReadOnlyAfterSave`
    /// - conceptual-null failures surfaced by the cascade pass
    pub fn entries_to_save(&mut self, cascade_changes: bool) -> Result<Vec<InstanceId>> {
        if cascade_changes {
            self.cascade_changes_impl(false)?;
        }
        let pending = self.entries_in(&PENDING);
        for id in &pending {
            self.prepare_to_save(*id)?;
        }
        Ok(pending)
    }

    /// Pre-save checks for one entry, then a fresh store-generated buffer
    ///
    /// # Errors
    ///
    /// `PropertyReadOnlyBeforeSave` when an Added entry carries an explicit
    /// value for a property the store must set; `PropertyReadOnlyAfterSave`
    /// when a Modified entry changed a property that may not change once saved.
    pub fn prepare_to_save(&mut self, id: InstanceId) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(shape) = self.table.entity_type(id) else {
            return Err(TrackerError::UnknownInstance {
                instance: id.to_string(),
            });
        };
        match self.state(id) {
            EntityState::Added => {
                let offending = shape.properties().iter().find(|p| {
                    model.property(**p).before_save_behavior() == SaveBehavior::Throw
                        && !self.table.has_temporary_value(id, **p)
                        && !self.table.has_default_value(id, **p)
                });
                if let Some(p) = offending {
                    return Err(TrackerError::PropertyReadOnlyBeforeSave {
                        entity_type: shape.name().to_string(),
                        property: model.property(*p).name().to_string(),
                    });
                }
            }
            EntityState::Modified => {
                let offending = shape.properties().iter().find(|p| {
                    model.property(**p).after_save_behavior() == SaveBehavior::Throw
                        && self.table.is_modified(id, **p)
                });
                if let Some(p) = offending {
                    return Err(TrackerError::PropertyReadOnlyAfterSave {
                        entity_type: shape.name().to_string(),
                        property: model.property(*p).name().to_string(),
                    });
                }
            }
            _ => {}
        }
        self.table.discard_store_generated_values(id);
        self.table.ensure_store_generated_values(id);
        Ok(())
    }

    /// Stage a value produced by the store; it is visible as the current
    /// value at once and written to the instance when changes are accepted
    ///
    /// # Errors
    ///
    /// `Store` if the property is not store-generated for this entry's shape.
    pub fn set_store_generated_value(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.check_property(id, property)?;
        if self.table.set_store_generated_value(id, property, value.into()) {
            Ok(())
        } else {
            Err(TrackerError::Store {
                message: format!(
                    "'{}' on entity type '{}' is not store-generated",
                    self.model().property(property).name(),
                    self.entity_type_name(id)
                ),
            })
        }
    }

    /// Write staged store-generated values into the instance
    fn commit_store_generated_values(&mut self, id: InstanceId) -> Result<()> {
        let staged = self.table.take_store_generated_values(id);
        for (property, value) in staged {
            tracing::trace!(instance = %id, property = property.index(), "committing store-generated value");
            self.set_property_internal(id, property, value, true, false)?;
        }
        Ok(())
    }

    /// Commit one entry: Added and Modified become Unchanged with their
    /// current values as originals, Deleted becomes Detached
    ///
    /// # Errors
    ///
    /// `TempValuePersists` if a temporary value is still unresolved.
    pub fn accept_changes(&mut self, id: InstanceId) -> Result<()> {
        self.table.entry(id)?;
        self.commit_store_generated_values(id)?;
        self.accept_state(id)
    }

    fn accept_state(&mut self, id: InstanceId) -> Result<()> {
        match self.state(id) {
            EntityState::Added | EntityState::Modified => {
                self.table.accept_original_values(id);
                self.change_state(id, EntityState::Unchanged, true, true)
            }
            EntityState::Deleted => self.change_state(id, EntityState::Detached, false, true),
            EntityState::Unchanged | EntityState::Detached => Ok(()),
        }
    }

    /// Accept every pending entry
    ///
    /// # Errors
    ///
    /// See [`StateManager::accept_changes`].
    pub fn accept_all_changes(&mut self) -> Result<()> {
        log_op_start!("accept_all_changes");
        let start = Instant::now();

        let pending = self.entries_in(&PENDING);
        self.accept_all_changes_impl(&pending).map_err(|e| {
            log_op_error!(
                "accept_all_changes",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "accept_all_changes",
            duration_ms = start.elapsed().as_millis() as u64,
            entry_count = pending.len()
        );

        Ok(())
    }

    /// Store-generated values of every entry land before any state moves,
    /// so dependents pick up a principal's real key before they leave Added.
    /// Nothing is touched unless every temporary value will be resolved.
    fn accept_all_changes_impl(&mut self, entries: &[InstanceId]) -> Result<()> {
        self.check_temporaries_resolved(entries)?;
        for id in entries {
            self.commit_store_generated_values(*id)?;
        }
        for id in entries {
            self.accept_state(*id)?;
        }
        Ok(())
    }

    /// Every temporary value of an Added entry must be replaced by a staged
    /// store value, either its own or the principal key it was copied from
    fn check_temporaries_resolved(&self, entries: &[InstanceId]) -> Result<()> {
        let model = self.model();
        for id in entries {
            if self.state(*id) != EntityState::Added {
                continue;
            }
            let Some(shape) = self.table.entity_type(*id) else {
                continue;
            };
            let unresolved = shape.properties().iter().find(|p| {
                self.table.has_temporary_value(*id, **p)
                    && !self.table.has_staged_value(*id, **p)
                    && !self.resolved_through_principal(*id, **p, entries)
            });
            if let Some(p) = unresolved {
                return Err(TrackerError::TempValuePersists {
                    entity_type: shape.name().to_string(),
                    property: model.property(*p).name().to_string(),
                    state: EntityState::Unchanged.to_string(),
                });
            }
        }
        Ok(())
    }

    fn resolved_through_principal(&self, id: InstanceId, property: PropertyId, entries: &[InstanceId]) -> bool {
        let model = self.model();
        let placeholder = self.table.raw_value(id, property);
        model
            .property(property)
            .containing_foreign_keys()
            .iter()
            .any(|fk_id| {
                let fk = model.foreign_key(*fk_id);
                let Some(position) = fk.properties().iter().position(|p| *p == property) else {
                    return false;
                };
                let Some(principal_property) = model.key(fk.principal_key()).properties().get(position) else {
                    return false;
                };
                entries.iter().any(|candidate| {
                    *candidate != id
                        && self.table.get(*candidate).is_some_and(|e| {
                            model.is_assignable_from(fk.principal_type(), e.entity_type())
                        })
                        && self.table.raw_value(*candidate, *principal_property) == placeholder
                        && self.table.has_staged_value(*candidate, *principal_property)
                })
            })
    }

    /// Save every pending change through `applier`
    ///
    /// Returns the number of rows the store reports as affected; 0 without
    /// calling the store when nothing is pending.
    ///
    /// # Errors
    ///
    /// Pre-save check failures, or whatever `applier` returns. Entry states
    /// are unchanged after a failure.
    pub fn save_changes(
        &mut self,
        accept_all_changes_on_success: bool,
        applier: &dyn StoreApplier,
        context: &RequestContext,
    ) -> Result<usize> {
        log_op_start!(
            "save_changes",
            request_id = %context.request_id,
            trace_id = context.trace_id.as_ref().map(TraceId::as_str)
        );
        let start = Instant::now();

        let result = self.save_changes_impl(accept_all_changes_on_success, applier, context);
        let (entry_count, rows_affected) = result.map_err(|e| {
            log_op_error!(
                "save_changes",
                ExError::from(e.clone()).with_context(context),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "save_changes",
            duration_ms = start.elapsed().as_millis() as u64,
            request_id = %context.request_id,
            trace_id = context.trace_id.as_ref().map(TraceId::as_str),
            entry_count = entry_count,
            rows_affected = rows_affected
        );

        Ok(rows_affected)
    }

    fn save_changes_impl(
        &mut self,
        accept_all_changes_on_success: bool,
        applier: &dyn StoreApplier,
        context: &RequestContext,
    ) -> Result<(usize, usize)> {
        let Some(entries) = self.begin_save()? else {
            return Ok((0, 0));
        };

        self.saving_changes = true;
        let applied = {
            let views: Vec<UpdateEntry<'_>> = entries
                .iter()
                .map(|id| UpdateEntry::new(&self.table, *id))
                .collect();
            applier.apply(&views, context)
        };
        let result = self.finish_save(&entries, applied, accept_all_changes_on_success);
        self.saving_changes = false;
        result.map(|rows| (entries.len(), rows))
    }

    /// Awaitable [`StateManager::save_changes`]; only the store step is awaited
    ///
    /// # Errors
    ///
    /// `Cancelled` when `cancellation` has fired before the save starts, with
    /// nothing changed; otherwise as [`StateManager::save_changes`].
    pub async fn save_changes_async(
        &mut self,
        accept_all_changes_on_success: bool,
        applier: &dyn StoreApplier,
        context: &RequestContext,
        cancellation: &CancellationToken,
    ) -> Result<usize> {
        log_op_start!(
            "save_changes_async",
            request_id = %context.request_id,
            trace_id = context.trace_id.as_ref().map(TraceId::as_str)
        );
        let start = Instant::now();

        let result = self
            .save_changes_async_impl(accept_all_changes_on_success, applier, context, cancellation)
            .await;
        let (entry_count, rows_affected) = result.map_err(|e| {
            log_op_error!(
                "save_changes_async",
                ExError::from(e.clone()).with_context(context),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "save_changes_async",
            duration_ms = start.elapsed().as_millis() as u64,
            request_id = %context.request_id,
            trace_id = context.trace_id.as_ref().map(TraceId::as_str),
            entry_count = entry_count,
            rows_affected = rows_affected
        );

        Ok(rows_affected)
    }

    async fn save_changes_async_impl(
        &mut self,
        accept_all_changes_on_success: bool,
        applier: &dyn StoreApplier,
        context: &RequestContext,
        cancellation: &CancellationToken,
    ) -> Result<(usize, usize)> {
        if cancellation.is_cancelled() {
            return Err(TrackerError::Cancelled {
                op: "save_changes_async".to_string(),
            });
        }
        let Some(entries) = self.begin_save()? else {
            return Ok((0, 0));
        };

        self.saving_changes = true;
        let applied = {
            let views: Vec<UpdateEntry<'_>> = entries
                .iter()
                .map(|id| UpdateEntry::new(&self.table, *id))
                .collect();
            applier.apply_async(&views, context, cancellation).await
        };
        let result = self.finish_save(&entries, applied, accept_all_changes_on_success);
        self.saving_changes = false;
        result.map(|rows| (entries.len(), rows))
    }

    /// Detect, cascade and check; `None` when there is nothing to save
    fn begin_save(&mut self) -> Result<Option<Vec<InstanceId>>> {
        if self.options.auto_detect_changes {
            self.detect_changes_impl()?;
        }
        if self.changed_count == 0 {
            return Ok(None);
        }
        let entries = match self.entries_to_save(true) {
            Ok(entries) => entries,
            Err(e) => {
                self.discard_all_store_generated_values();
                return Err(e);
            }
        };
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(entries))
    }

    fn finish_save(
        &mut self,
        entries: &[InstanceId],
        applied: Result<StoreResult>,
        accept_all_changes_on_success: bool,
    ) -> Result<usize> {
        let outcome = applied.and_then(|store| {
            for generated in &store.generated {
                if !entries.contains(&generated.instance) {
                    return Err(TrackerError::Store {
                        message: format!("instance {} was not part of the save", generated.instance),
                    });
                }
                self.set_store_generated_value(generated.instance, generated.property, generated.value.clone())?;
            }
            if accept_all_changes_on_success {
                self.accept_all_changes_impl(entries)?;
            }
            Ok(store.rows_affected)
        });
        if outcome.is_err() {
            for id in entries {
                self.table.discard_store_generated_values(*id);
            }
        }
        outcome
    }

    fn discard_all_store_generated_values(&mut self) {
        for id in self.entries_in(&PENDING) {
            self.table.discard_store_generated_values(id);
        }
    }
}
