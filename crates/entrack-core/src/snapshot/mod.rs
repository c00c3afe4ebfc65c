//! Positional value containers captured per tracked entry
//!
//! A snapshot has a fixed number of slots decided by the entity shape. Large
//! snapshots are split into chained blocks of [`SNAPSHOT_CAPACITY`] slots,
//! addressed by `slot / SNAPSHOT_CAPACITY`. An empty snapshot means nothing
//! has been captured yet and readers fall back to the live value.

mod factory;

pub use factory::{
    RowReader, ShadowValuesFactory, SlotReader, SnapshotFactories, SnapshotFactory, SnapshotSource,
};

/// Slots held by one block of a chained snapshot
pub const SNAPSHOT_CAPACITY: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot<T> {
    Empty,
    Values(Box<[T]>),
    Chained(Box<[Box<[T]>]>),
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Snapshot::Empty
    }
}

impl<T> Snapshot<T> {
    pub fn from_values(values: Vec<T>) -> Self {
        if values.is_empty() {
            return Snapshot::Empty;
        }
        if values.len() <= SNAPSHOT_CAPACITY {
            return Snapshot::Values(values.into_boxed_slice());
        }
        let mut blocks = Vec::with_capacity(values.len().div_ceil(SNAPSHOT_CAPACITY));
        let mut iter = values.into_iter();
        loop {
            let block: Vec<T> = iter.by_ref().take(SNAPSHOT_CAPACITY).collect();
            if block.is_empty() {
                break;
            }
            blocks.push(block.into_boxed_slice());
        }
        Snapshot::Chained(blocks.into_boxed_slice())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Snapshot::Empty)
    }

    pub fn len(&self) -> usize {
        match self {
            Snapshot::Empty => 0,
            Snapshot::Values(values) => values.len(),
            Snapshot::Chained(blocks) => blocks.iter().map(|b| b.len()).sum(),
        }
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        match self {
            Snapshot::Empty => None,
            Snapshot::Values(values) => values.get(slot),
            Snapshot::Chained(blocks) => blocks
                .get(slot / SNAPSHOT_CAPACITY)?
                .get(slot % SNAPSHOT_CAPACITY),
        }
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        match self {
            Snapshot::Empty => None,
            Snapshot::Values(values) => values.get_mut(slot),
            Snapshot::Chained(blocks) => blocks
                .get_mut(slot / SNAPSHOT_CAPACITY)?
                .get_mut(slot % SNAPSHOT_CAPACITY),
        }
    }

    /// Overwrite one slot; returns false when the slot does not exist
    pub fn set(&mut self, slot: usize, value: T) -> bool {
        match self.get_mut(slot) {
            Some(current) => {
                *current = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Snapshot::Empty => Box::new(std::iter::empty()),
            Snapshot::Values(values) => Box::new(values.iter()),
            Snapshot::Chained(blocks) => Box::new(blocks.iter().flat_map(|b| b.iter())),
        }
    }
}
