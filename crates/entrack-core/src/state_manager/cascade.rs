//! Cascade delete and conceptual-null handling

use std::sync::Arc;
use std::time::Instant;

use entrack_core_types::Sensitive;

use crate::config::CascadeTiming;
use crate::entry::EntityState;
use crate::errors::{Result, TrackerError};
use crate::graph::InstanceId;
use crate::model::{DeleteBehavior, ForeignKeyId, Value};
use crate::{log_op_end, log_op_error, log_op_start};

use super::StateManager;

impl StateManager {
    /// Resolve conceptual nulls of Added/Modified entries, then cascade the
    /// deletions of Deleted entries
    ///
    /// With `force`, cascades run even when their timing is `Never`.
    ///
    /// # Errors
    ///
    /// `RelationshipConceptualNull` / `PropertyConceptualNull` when a nulled
    /// required member has no cascading relationship to fall back on.
    pub fn cascade_changes(&mut self, force: bool) -> Result<()> {
        log_op_start!("cascade_changes", force = force);
        let start = Instant::now();

        let result = if self.options.auto_detect_changes {
            self.detect_changes_impl()
                .and_then(|_| self.cascade_changes_impl(force))
        } else {
            self.cascade_changes_impl(force)
        };
        let count = result.map_err(|e| {
            log_op_error!(
                "cascade_changes",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "cascade_changes",
            duration_ms = start.elapsed().as_millis() as u64,
            entry_count = count
        );

        Ok(())
    }

    pub(crate) fn cascade_changes_impl(&mut self, force: bool) -> Result<usize> {
        let pending = self.entries_in(&[EntityState::Added, EntityState::Modified]);
        for id in &pending {
            if self.table.has_conceptual_null(*id) {
                self.handle_conceptual_nulls(*id, force, false)?;
            }
        }
        let deleted = self.entries_in(&[EntityState::Deleted]);
        for id in &deleted {
            self.cascade_delete(*id, force)?;
        }
        Ok(pending.len() + deleted.len())
    }

    /// Delete, detach or sever the dependents of `principal`
    ///
    /// Dependents of cascading relationships follow the principal (Added
    /// dependents, and every dependent of a detached principal, are detached
    /// rather than deleted); dependents of other relationships get their
    /// foreign key nulled. `ClientNoAction` relationships are left alone.
    ///
    /// # Errors
    ///
    /// `RelationshipConceptualNull` when a required, non-cascading dependent
    /// would be orphaned.
    pub fn cascade_delete(&mut self, principal: InstanceId, force: bool) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(shape) = self.table.entity_type(principal) else {
            return Ok(());
        };
        let foreign_keys: Vec<ForeignKeyId> = shape.referencing_foreign_keys().to_vec();
        let do_cascade = force || self.options.cascade_delete_timing != CascadeTiming::Never;
        let principal_detached = self.state(principal) == EntityState::Detached;

        for fk_id in foreign_keys {
            let fk = model.foreign_key(fk_id);
            if fk.delete_behavior() == DeleteBehavior::ClientNoAction {
                continue;
            }
            let dependents = match self.dependents_from_navigation(principal, fk_id) {
                Some(dependents) => dependents,
                None => self.dependents_of(principal, fk_id),
            };
            for dependent in dependents {
                if dependent == principal {
                    continue;
                }
                if self.options.auto_detect_changes && self.is_tracked(dependent) {
                    self.detect_entry_changes(dependent)?;
                }
                let state = self.state(dependent);
                if matches!(state, EntityState::Deleted | EntityState::Detached) {
                    continue;
                }
                if state != EntityState::Added && !self.keys_equal(principal, fk_id, dependent) {
                    continue;
                }

                if fk.delete_behavior().is_cascading() && do_cascade {
                    let cascade_state = if principal_detached || state == EntityState::Added {
                        EntityState::Detached
                    } else {
                        EntityState::Deleted
                    };
                    tracing::debug!(
                        principal = %principal,
                        dependent = %dependent,
                        new_state = %cascade_state,
                        "cascade delete"
                    );
                    self.change_state(dependent, cascade_state, false, true)?;
                    self.cascade_delete(dependent, force)?;
                } else if !principal_detached {
                    tracing::debug!(principal = %principal, dependent = %dependent, "severing dependent");
                    for p in fk.properties() {
                        self.set_property_internal(dependent, *p, Value::Null, true, true)?;
                    }
                    if self.table.has_conceptual_null(dependent) {
                        self.handle_conceptual_nulls(dependent, force, true)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Act on the conceptual-null flags of `id`
    ///
    /// A non-cascading foreign key with a nullable column is severed by
    /// nulling its nullable columns. A cascading relationship among the
    /// remaining nulled foreign keys deletes the entry (detaches it if Added)
    /// when orphan deletion is allowed; anything else is an error naming the
    /// first offending relationship or property.
    pub(crate) fn handle_conceptual_nulls(
        &mut self,
        id: InstanceId,
        force: bool,
        is_cascade_delete: bool,
    ) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(shape) = self.table.entity_type(id) else {
            return Ok(());
        };
        let shape_name = shape.name().to_string();
        let properties = shape.properties().to_vec();

        let mut nulled: Vec<ForeignKeyId> = Vec::new();
        for fk_id in shape.foreign_keys().to_vec() {
            let fk = model.foreign_key(fk_id);
            let Some(flagged) = fk
                .properties()
                .iter()
                .copied()
                .find(|p| self.table.is_conceptual_null(id, *p))
            else {
                continue;
            };
            let partly_nullable = fk.properties().iter().any(|p| model.property(*p).is_nullable());
            if partly_nullable && !fk.delete_behavior().is_cascading() {
                // sever through the nullable columns; the others keep their values
                for p in fk.properties() {
                    if model.property(*p).is_nullable() {
                        self.set_property_internal(id, *p, Value::Null, true, false)?;
                    } else {
                        let ordinal = model.property(*p).index();
                        if let Some(entry) = self.table.get_mut(id) {
                            entry.flags.set_conceptual_null(ordinal, false);
                        }
                    }
                }
            } else if self.state(id) != EntityState::Modified || self.table.is_modified(id, flagged) {
                nulled.push(fk_id);
            }
        }

        let cascading = nulled
            .iter()
            .any(|fk| model.foreign_key(*fk).delete_behavior().is_cascading());
        if cascading
            && (force
                || (!is_cascade_delete && self.options.delete_orphans_timing != CascadeTiming::Never))
        {
            let state = self.state(id);
            let target = if state == EntityState::Added {
                EntityState::Detached
            } else {
                EntityState::Deleted
            };
            tracing::debug!(instance = %id, new_state = %target, "orphan removed");
            return self.change_state(id, target, false, true);
        }

        if let Some(fk) = nulled.first() {
            let fk = model.foreign_key(*fk);
            let detail = if self.options.sensitive_data_logging {
                self.table
                    .primary_key_value(id)
                    .map(|key| format!(" for the dependent with key value {}", Sensitive::new(key).render(true)))
                    .unwrap_or_default()
            } else {
                String::new()
            };
            return Err(TrackerError::RelationshipConceptualNull {
                principal_type: model.entity_type(fk.principal_type()).name().to_string(),
                dependent_type: shape_name,
                detail,
            });
        }

        let state = self.state(id);
        let property = properties.into_iter().find(|p| {
            (state != EntityState::Modified || self.table.is_modified(id, *p))
                && self.table.is_conceptual_null(id, *p)
        });
        if let Some(p) = property {
            return Err(TrackerError::PropertyConceptualNull {
                entity_type: shape_name,
                property: model.property(p).name().to_string(),
            });
        }
        Ok(())
    }

    /// Whether the dependent's foreign key still holds the principal's key
    fn keys_equal(&self, principal: InstanceId, fk: ForeignKeyId, dependent: InstanceId) -> bool {
        let model = self.model();
        let foreign_key = model.foreign_key(fk);
        let principal_properties = model.key(foreign_key.principal_key()).properties();
        principal_properties
            .iter()
            .zip(foreign_key.properties())
            .all(|(pp, dp)| {
                self.table.current_value(principal, *pp) == self.table.current_value(dependent, *dp)
            })
    }
}
