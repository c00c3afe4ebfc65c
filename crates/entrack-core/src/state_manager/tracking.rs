//! Identity-map membership, principal and dependent lookups, dangling references

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::TrackerOptions;
use crate::entry::EntityState;
use crate::errors::{Result, TrackerError};
use crate::graph::InstanceId;
use crate::identity::IdentityMap;
use crate::model::{EntityTypeId, ForeignKeyId, KeyId, NavigationId};
use crate::row::ValueBuffer;

use super::StateManager;

fn identity_map_entry<'a>(
    maps: &'a mut HashMap<KeyId, IdentityMap>,
    options: &TrackerOptions,
    key: KeyId,
) -> &'a mut IdentityMap {
    maps.entry(key).or_insert_with(|| {
        IdentityMap::new(key, options.allow_null_keys, options.sensitive_data_logging)
    })
}

impl StateManager {
    /// Validate that `id` could be tracked without changing anything
    ///
    /// # Errors
    ///
    /// `MissingNotificationInterface` for a non-notifying instance of a
    /// push-notification shape; otherwise any identity-map rejection.
    pub(crate) fn check_can_track(&self, id: InstanceId) -> Result<()> {
        let entry = self.table.entry(id)?;
        let model = self.model();
        let shape = model.entity_type(entry.entity_type());
        let strategy = shape.change_tracking_strategy();
        let notifying = self
            .table
            .graph()
            .get(id)
            .is_some_and(|i| i.provides_notifications());
        if strategy.requires_notifications() && !notifying {
            return Err(TrackerError::MissingNotificationInterface {
                entity_type: shape.name().to_string(),
                strategy: format!("{strategy:?}"),
            });
        }
        for key in shape.keys() {
            match self.identity_maps.get(key) {
                Some(map) => {
                    map.check_add(&self.table, id)?;
                }
                None => {
                    IdentityMap::new(
                        *key,
                        self.options.allow_null_keys,
                        self.options.sensitive_data_logging,
                    )
                    .check_add(&self.table, id)?;
                }
            }
        }
        Ok(())
    }

    /// Index `id` under every key of its shape and take its eager snapshots
    pub(crate) fn start_tracking(&mut self, id: InstanceId) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return Ok(());
        };
        let shape = model.entity_type(ty);
        for key in shape.keys() {
            identity_map_entry(&mut self.identity_maps, &self.options, *key).add(&self.table, id)?;
        }
        if shape.change_tracking_strategy().uses_eager_snapshots() {
            self.table.ensure_original_values(id);
            self.table.ensure_relationship_snapshot(id);
        }
        tracing::trace!(instance = %id, entity_type = shape.name(), "tracking started");
        Ok(())
    }

    pub(crate) fn stop_tracking(&mut self, id: InstanceId) {
        let model = Arc::clone(self.model());
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return;
        };
        for key in model.entity_type(ty).keys() {
            if let Some(map) = self.identity_maps.get_mut(key) {
                map.remove(&self.table, id);
            }
        }
        self.danglers.retain(|_, referrers| {
            referrers.retain(|(referrer, _)| *referrer != id);
            !referrers.is_empty()
        });
        self.table.clear_snapshots(id);
        tracing::trace!(instance = %id, "tracking stopped");
    }

    /// Track an instance materialized from a query row as Unchanged
    ///
    /// When an entry with the same primary key is already tracked, that entry
    /// is returned and the row is ignored.
    ///
    /// # Errors
    ///
    /// `KeyTypeMismatch` when the row's key columns have the wrong kind,
    /// `InvalidKeyValue` when they are null.
    pub fn start_tracking_from_query(
        &mut self,
        entity_type: EntityTypeId,
        row: &ValueBuffer,
    ) -> Result<InstanceId> {
        let model = Arc::clone(self.model());
        let shape = model.try_entity_type(entity_type)?;
        let primary_key = model.key(shape.primary_key());
        let key = primary_key.factory().from_row(row, shape.name())?;
        let Some(key) = key else {
            return Err(TrackerError::InvalidKeyValue {
                entity_type: shape.name().to_string(),
                properties: model.display_properties(primary_key.properties()),
            });
        };
        if let Some(existing) = self
            .identity_maps
            .get(&shape.primary_key())
            .and_then(|map| map.try_get(&key))
        {
            tracing::trace!(instance = %existing, "query row resolved to tracked entry");
            return Ok(existing);
        }

        let id = self.table.insert_from_row(entity_type, row);
        if let Err(e) = self.check_can_track(id) {
            self.table.remove_last(id);
            return Err(e);
        }
        for key in shape.keys() {
            identity_map_entry(&mut self.identity_maps, &self.options, *key).add(&self.table, id)?;
        }
        self.mark_unchanged_from_query(id)?;
        self.table.ensure_original_values(id);
        self.table.ensure_relationship_snapshot(id);
        Ok(id)
    }

    fn mark_unchanged_from_query(&mut self, id: InstanceId) -> Result<()> {
        self.notify_state_changing(id, EntityState::Unchanged);
        self.table.set_state(id, EntityState::Unchanged);
        self.fire_state_changed(id, EntityState::Detached, true)
    }

    // ===== Principal lookups =====

    fn principal_filter(&self, fk: ForeignKeyId, candidate: InstanceId) -> bool {
        let model = self.model();
        self.table.get(candidate).is_some_and(|e| {
            model.is_assignable_from(model.foreign_key(fk).principal_type(), e.entity_type())
        })
    }

    /// Reject a relationship handle that `instance` cannot take part in from
    /// the given side
    fn check_relationship(&self, instance: InstanceId, fk: ForeignKeyId, as_dependent: bool) -> Result<()> {
        let model = self.model();
        let ty = self.table.entry(instance)?.entity_type();
        let related = model.try_foreign_key(fk).is_some_and(|foreign_key| {
            let side = if as_dependent {
                foreign_key.declaring_type()
            } else {
                foreign_key.principal_type()
            };
            model.is_assignable_from(side, ty)
        });
        if related {
            return Ok(());
        }
        Err(TrackerError::UnknownMember {
            entity_type: model.entity_type(ty).name().to_string(),
            member: format!("foreign key #{}", fk.index()),
        })
    }

    /// Tracked principal matching the dependent's current foreign-key values
    ///
    /// # Errors
    ///
    /// `UnknownMember` when `fk` is not a relationship of the dependent's
    /// entity type.
    pub fn find_principal(&self, dependent: InstanceId, fk: ForeignKeyId) -> Result<Option<InstanceId>> {
        self.check_relationship(dependent, fk, true)?;
        Ok(self.principal_of(dependent, fk))
    }

    pub(crate) fn principal_of(&self, dependent: InstanceId, fk: ForeignKeyId) -> Option<InstanceId> {
        let model = self.model();
        let foreign_key = model.foreign_key(fk);
        let key = foreign_key.factory().from_current(&self.table, dependent)?;
        self.identity_maps
            .get(&foreign_key.principal_key())?
            .try_get(&key)
            .filter(|p| self.principal_filter(fk, *p))
    }

    /// Tracked principal matching the foreign-key values of the last relationship snapshot
    ///
    /// # Errors
    ///
    /// As [`StateManager::find_principal`].
    pub fn find_principal_using_relationship_snapshot(
        &self,
        dependent: InstanceId,
        fk: ForeignKeyId,
    ) -> Result<Option<InstanceId>> {
        self.check_relationship(dependent, fk, true)?;
        Ok(self.snapshot_principal_of(dependent, fk))
    }

    pub(crate) fn snapshot_principal_of(&self, dependent: InstanceId, fk: ForeignKeyId) -> Option<InstanceId> {
        let model = self.model();
        let foreign_key = model.foreign_key(fk);
        let key = foreign_key
            .factory()
            .from_relationship_snapshot(&self.table, dependent)?;
        self.identity_maps
            .get(&foreign_key.principal_key())?
            .try_get(&key)
            .filter(|p| self.principal_filter(fk, *p))
    }

    // ===== Dependent lookups =====

    fn dependents_lookup(
        &mut self,
        principal: InstanceId,
        fk: ForeignKeyId,
        using_snapshot: bool,
    ) -> Vec<InstanceId> {
        let model = Arc::clone(self.model());
        let foreign_key = model.foreign_key(fk);
        let Some(ty) = self.table.get(principal).map(|e| e.entity_type()) else {
            return Vec::new();
        };
        if !model.is_assignable_from(foreign_key.principal_type(), ty) {
            return Vec::new();
        }
        let dependent_key = model.entity_type(foreign_key.declaring_type()).primary_key();
        let Some(map) = self.identity_maps.get_mut(&dependent_key) else {
            return Vec::new();
        };
        let dependents = map.dependents_map(&self.table, fk);
        if using_snapshot {
            dependents.dependents_using_relationship_snapshot(&self.table, principal)
        } else {
            dependents.dependents(&self.table, principal)
        }
    }

    /// Tracked dependents whose foreign key matches the principal's current key
    ///
    /// # Errors
    ///
    /// `UnknownMember` when `fk` does not reference the principal's entity type.
    pub fn dependents(&mut self, principal: InstanceId, fk: ForeignKeyId) -> Result<Vec<InstanceId>> {
        self.check_relationship(principal, fk, false)?;
        Ok(self.dependents_of(principal, fk))
    }

    pub(crate) fn dependents_of(&mut self, principal: InstanceId, fk: ForeignKeyId) -> Vec<InstanceId> {
        self.dependents_lookup(principal, fk, false)
    }

    /// Tracked dependents matching the key the principal had before a pending key edit
    ///
    /// # Errors
    ///
    /// As [`StateManager::dependents`].
    pub fn dependents_using_relationship_snapshot(
        &mut self,
        principal: InstanceId,
        fk: ForeignKeyId,
    ) -> Result<Vec<InstanceId>> {
        self.check_relationship(principal, fk, false)?;
        Ok(self.snapshot_dependents_of(principal, fk))
    }

    pub(crate) fn snapshot_dependents_of(&mut self, principal: InstanceId, fk: ForeignKeyId) -> Vec<InstanceId> {
        self.dependents_lookup(principal, fk, true)
    }

    /// Tracked dependents reachable through the principal's own navigation,
    /// or `None` when the relationship has no principal-side navigation
    pub(crate) fn dependents_from_navigation(
        &self,
        principal: InstanceId,
        fk: ForeignKeyId,
    ) -> Option<Vec<InstanceId>> {
        let model = self.model();
        let foreign_key = model.foreign_key(fk);
        let navigation = foreign_key.principal_to_dependent()?;
        let ty = self.table.get(principal)?.entity_type();
        if !model.is_assignable_from(model.navigation(navigation).declaring_type(), ty) {
            return Some(Vec::new());
        }
        Some(
            self.table
                .navigation_targets(principal, navigation)
                .into_iter()
                .filter(|d| self.is_tracked(*d))
                .collect(),
        )
    }

    // ===== Index maintenance =====

    /// Re-index after a key edit
    ///
    /// # Errors
    ///
    /// `IdentityConflict` when the new key is taken; the map is then unchanged.
    pub(crate) fn update_identity_map(&mut self, id: InstanceId, key: KeyId) -> Result<()> {
        if !self.is_tracked(id) {
            return Ok(());
        }
        identity_map_entry(&mut self.identity_maps, &self.options, key).update(&self.table, id)
    }

    pub(crate) fn update_dependents_map(&mut self, id: InstanceId, fk: ForeignKeyId) {
        if !self.is_tracked(id) {
            return;
        }
        let model = Arc::clone(self.model());
        let dependent_key = model
            .entity_type(model.foreign_key(fk).declaring_type())
            .primary_key();
        if let Some(map) = self.identity_maps.get_mut(&dependent_key) {
            map.update_dependent(&self.table, fk, id);
        }
    }

    // ===== Dangling references =====

    /// Remember that tracked `referrer` points at untracked `target` through `navigation`
    pub(crate) fn record_referenced_untracked(
        &mut self,
        target: InstanceId,
        navigation: NavigationId,
        referrer: InstanceId,
    ) {
        let referrers = self.danglers.entry(target).or_default();
        if !referrers.contains(&(referrer, navigation)) {
            referrers.push((referrer, navigation));
            tracing::trace!(instance = %target, referrer = %referrer, "dangling reference recorded");
        }
    }

    /// Referrers recorded against `target`, optionally forgetting them
    pub fn recorded_referrers(&mut self, target: InstanceId, clear: bool) -> Vec<(InstanceId, NavigationId)> {
        if clear {
            self.danglers.remove(&target).unwrap_or_default()
        } else {
            self.danglers.get(&target).cloned().unwrap_or_default()
        }
    }
}
