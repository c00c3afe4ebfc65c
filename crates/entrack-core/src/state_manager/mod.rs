//! The tracking context
//!
//! A [`StateManager`] owns every instance created through it, one entry per
//! instance, the identity maps of each key and the bookkeeping that keeps
//! navigations and foreign keys consistent.
//!
//! ## Logging Ownership
//!
//! Operations a caller requests as a unit of work own lifecycle logging:
//! - `log_op_start!` at entry
//! - `log_op_end!` on success
//! - `log_op_error!` on failure
//!
//! These are `set_entity_state*`, `detect_changes`, `cascade_changes`,
//! `accept_all_changes`, `save_changes*` and `attach_graph*`. Everything they
//! call into (fixup, cascades, identity maps, value generation) logs with
//! `tracing::debug!`/`tracing::trace!` only.

mod attach;
mod cascade;
mod change_detector;
mod debug_view;
mod properties;
mod save;
mod tracking;
mod transitions;

use std::collections::HashMap;
use std::sync::Arc;

pub use debug_view::DebugViewMode;

use crate::config::TrackerOptions;
use crate::entry::{EntityState, EntryTable, TrackedEntry, UpdateEntry};
use crate::errors::{Result, TrackerError};
use crate::fixup::{CriticalSection, FixupStats};
use crate::graph::InstanceId;
use crate::hooks::EntityStateListener;
use crate::identity::IdentityMap;
use crate::model::{EntityTypeId, KeyId, Model, NavigationId, Value};
use crate::value_generation::ValueGeneratorRegistry;

/// Tracking context for one unit of work
///
/// Single writer: every mutating operation takes `&mut self`.
pub struct StateManager {
    pub(crate) table: EntryTable,
    pub(crate) options: TrackerOptions,
    pub(crate) identity_maps: HashMap<KeyId, IdentityMap>,
    /// Untracked instance -> (tracked referrer, navigation of the referrer)
    pub(crate) danglers: HashMap<InstanceId, Vec<(InstanceId, NavigationId)>>,
    pub(crate) fixup: CriticalSection,
    pub(crate) detection_suspended: u32,
    pub(crate) generators: ValueGeneratorRegistry,
    pub(crate) listeners: Vec<Box<dyn EntityStateListener>>,
    pub(crate) changed_count: usize,
    pub(crate) saving_changes: bool,
}

impl StateManager {
    pub fn new(model: Arc<Model>) -> Self {
        Self::with_options(model, TrackerOptions::default())
    }

    pub fn with_options(model: Arc<Model>, options: TrackerOptions) -> Self {
        Self {
            table: EntryTable::new(model),
            options,
            identity_maps: HashMap::new(),
            danglers: HashMap::new(),
            fixup: CriticalSection::new(),
            detection_suspended: 0,
            generators: ValueGeneratorRegistry::new(),
            listeners: Vec::new(),
            changed_count: 0,
            saving_changes: false,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        self.table.model()
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    /// Read access to instances, entries and their values
    pub fn table(&self) -> &EntryTable {
        &self.table
    }

    /// # Errors
    ///
    /// `UnknownInstance` if `id` was not created by this context.
    pub fn entry(&self, id: InstanceId) -> Result<&TrackedEntry> {
        self.table.entry(id)
    }

    pub fn state(&self, id: InstanceId) -> EntityState {
        self.table.state(id)
    }

    /// # Errors
    ///
    /// `UnknownInstance` if `id` was not created by this context.
    pub fn update_entry(&self, id: InstanceId) -> Result<UpdateEntry<'_>> {
        self.table.entry(id)?;
        Ok(UpdateEntry::new(&self.table, id))
    }

    /// Every tracked (non-detached) instance, in creation order
    pub fn entries(&self) -> Vec<InstanceId> {
        self.table
            .ids()
            .filter(|id| self.table.state(*id) != EntityState::Detached)
            .collect()
    }

    pub fn entries_in(&self, states: &[EntityState]) -> Vec<InstanceId> {
        self.table
            .ids()
            .filter(|id| states.contains(&self.table.state(*id)))
            .collect()
    }

    /// Tracked instance holding `values` under `key`, in key-property order
    pub fn try_get_entry(&self, key: KeyId, values: Vec<Value>) -> Option<InstanceId> {
        self.identity_maps
            .get(&key)
            .and_then(|map| map.try_get_by_values(&self.table, values))
    }

    /// Number of entries currently Added, Modified or Deleted
    pub fn changed_count(&self) -> usize {
        self.changed_count
    }

    pub fn is_saving_changes(&self) -> bool {
        self.saving_changes
    }

    pub fn add_listener(&mut self, listener: Box<dyn EntityStateListener>) {
        self.listeners.push(listener);
    }

    pub fn generators_mut(&mut self) -> &mut ValueGeneratorRegistry {
        &mut self.generators
    }

    pub fn fixup_stats(&self) -> FixupStats {
        self.fixup.stats()
    }

    pub fn reset_fixup_stats(&mut self) {
        self.fixup.reset_stats();
    }

    /// Nested; each call needs a matching [`StateManager::resume_change_detection`]
    pub fn suspend_change_detection(&mut self) {
        self.detection_suspended += 1;
    }

    pub fn resume_change_detection(&mut self) {
        self.detection_suspended = self.detection_suspended.saturating_sub(1);
    }

    pub fn is_change_detection_suspended(&self) -> bool {
        self.detection_suspended > 0
    }

    /// New detached instance with default member values
    ///
    /// Instances of push-notification shapes report their own changes.
    ///
    /// # Errors
    ///
    /// `UnknownEntityType` if the handle is not part of the model.
    pub fn create_instance(&mut self, entity_type: EntityTypeId) -> Result<InstanceId> {
        let notifying = self
            .model()
            .try_entity_type(entity_type)?
            .change_tracking_strategy()
            .requires_notifications();
        Ok(self.table.insert(entity_type, notifying))
    }

    /// New detached instance with an explicit notification capability
    ///
    /// # Errors
    ///
    /// `UnknownEntityType` if the handle is not part of the model.
    pub fn create_instance_with_notifications(
        &mut self,
        entity_type: EntityTypeId,
        notifying: bool,
    ) -> Result<InstanceId> {
        self.model().try_entity_type(entity_type)?;
        Ok(self.table.insert(entity_type, notifying))
    }

    /// Forget every instance and entry; handles issued before are invalid afterwards
    pub fn clear(&mut self) {
        self.changed_count = 0;
        self.danglers.clear();
        for map in self.identity_maps.values_mut() {
            map.clear();
        }
        self.identity_maps.clear();
        self.table.clear();
        self.saving_changes = false;
        tracing::debug!("tracking context cleared");
    }

    // ===== Shared helpers =====

    pub(crate) fn entity_type_name(&self, id: InstanceId) -> String {
        self.table
            .entity_type(id)
            .map(|t| t.name().to_string())
            .unwrap_or_default()
    }

    pub(crate) fn is_tracked(&self, id: InstanceId) -> bool {
        self.table.state(id) != EntityState::Detached
    }

    /// Run `body` with navigation-change notifications silenced
    pub(crate) fn with_detection_suspended<T>(&mut self, body: impl FnOnce(&mut Self) -> T) -> T {
        self.suspend_change_detection();
        let result = body(self);
        self.resume_change_detection();
        result
    }

    pub(crate) fn check_member(&self, id: InstanceId, member: &str, present: bool) -> Result<()> {
        if present {
            Ok(())
        } else {
            Err(TrackerError::UnknownMember {
                entity_type: self.entity_type_name(id),
                member: member.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("entries", &self.table.len())
            .field("changed_count", &self.changed_count)
            .field("identity_maps", &self.identity_maps.len())
            .field("danglers", &self.danglers.len())
            .field("saving_changes", &self.saving_changes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeTrackingStrategy, ModelBuilder, ValueKind};

    fn model() -> (Arc<Model>, EntityTypeId, EntityTypeId) {
        let mut b = ModelBuilder::new();
        let plain = b.entity("Plain");
        let id = b.property(plain, "Id", ValueKind::Int).build();
        b.primary_key(plain, &[id]);
        let pushy = b.entity_with_strategy("Pushy", ChangeTrackingStrategy::ChangedNotifications);
        let pid = b.property(pushy, "Id", ValueKind::Int).build();
        b.primary_key(pushy, &[pid]);
        (Arc::new(b.finish().unwrap()), plain, pushy)
    }

    #[test]
    fn test_create_instance_follows_strategy() {
        let (model, plain, pushy) = model();
        let mut sm = StateManager::new(model);
        let a = sm.create_instance(plain).unwrap();
        let b = sm.create_instance(pushy).unwrap();
        assert!(!sm.table().graph().get(a).unwrap().provides_notifications());
        assert!(sm.table().graph().get(b).unwrap().provides_notifications());
        assert_eq!(sm.state(a), EntityState::Detached);
        assert!(sm.entries().is_empty());
    }

    #[test]
    fn test_suspension_nests() {
        let (model, ..) = model();
        let mut sm = StateManager::new(model);
        sm.suspend_change_detection();
        sm.suspend_change_detection();
        sm.resume_change_detection();
        assert!(sm.is_change_detection_suspended());
        sm.resume_change_detection();
        assert!(!sm.is_change_detection_suspended());
    }

    #[test]
    fn test_unknown_instance_entry() {
        let (model, ..) = model();
        let sm = StateManager::new(model);
        assert!(matches!(
            sm.update_entry(InstanceId(9)),
            Err(TrackerError::UnknownInstance { .. })
        ));
    }
}
