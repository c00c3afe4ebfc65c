//! Tracked entries: per-instance state, property flags and snapshots

mod flags;
mod table;
mod update_entry;

pub use flags::{PropertyFlag, PropertyFlags};
pub use table::EntryTable;
pub use update_entry::UpdateEntry;

use std::fmt;

use crate::graph::MemberValue;
use crate::model::{EntityType, EntityTypeId, Value};
use crate::row::ValueBuffer;
use crate::snapshot::Snapshot;

/// Lifecycle state of a tracked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityState {
    #[default]
    Detached,
    Unchanged,
    Deleted,
    Modified,
    Added,
}

impl EntityState {
    /// Whether the entry takes part in a save
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Deleted => "Deleted",
            EntityState::Modified => "Modified",
            EntityState::Added => "Added",
        };
        f.write_str(name)
    }
}

/// Tracking data of one instance
///
/// Snapshots start empty and are materialized on first need; an empty
/// snapshot makes readers fall back to the live value.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub(crate) entity_type: EntityTypeId,
    pub(crate) state: EntityState,
    pub(crate) flags: PropertyFlags,
    pub(crate) original_values: Snapshot<Value>,
    pub(crate) relationship_snapshot: Snapshot<MemberValue>,
    pub(crate) shadow_values: Snapshot<Value>,
    /// Present only between `prepare_to_save` and accept/discard
    pub(crate) store_generated_values: Snapshot<Option<Value>>,
}

impl TrackedEntry {
    pub(crate) fn new(shape: &EntityType, row: &ValueBuffer) -> Self {
        Self {
            entity_type: shape.id(),
            state: EntityState::Detached,
            flags: PropertyFlags::new(shape.counts().properties),
            original_values: Snapshot::Empty,
            relationship_snapshot: Snapshot::Empty,
            shadow_values: shape.snapshot_factories().shadow_values.create(row),
            store_generated_values: Snapshot::Empty,
        }
    }

    pub fn entity_type(&self) -> EntityTypeId {
        self.entity_type
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn flags(&self) -> &PropertyFlags {
        &self.flags
    }

    pub fn has_original_values_snapshot(&self) -> bool {
        !self.original_values.is_empty()
    }

    pub fn has_relationship_snapshot(&self) -> bool {
        !self.relationship_snapshot.is_empty()
    }

    pub fn has_conceptual_null(&self) -> bool {
        self.flags.any(PropertyFlag::CONCEPTUAL_NULL)
    }
}
