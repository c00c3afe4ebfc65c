//! Per-shape snapshot factories
//!
//! Each factory is a table of accessor closures, one per included slot, built
//! once at model finalization from the members' [`MemberAccess`].

use std::fmt;
use std::sync::Arc;

use crate::graph::{InstanceId, MemberValue};
use crate::model::{MemberAccess, Navigation, Property, ShapeCounts, Value};
use crate::row::ValueBuffer;

use super::Snapshot;

/// Read access to the live members of one tracked instance
pub trait SnapshotSource {
    fn scalar(&self, field: usize) -> Value;
    fn reference(&self, field: usize) -> Option<InstanceId>;
    fn collection(&self, field: usize) -> Vec<InstanceId>;
    fn shadow(&self, slot: usize) -> Value;
}

pub type SlotReader<T> = Arc<dyn Fn(&dyn SnapshotSource) -> T + Send + Sync>;
pub type RowReader = Arc<dyn Fn(&ValueBuffer) -> Value + Send + Sync>;

fn reader<T>(read: impl Fn(&dyn SnapshotSource) -> T + Send + Sync + 'static) -> SlotReader<T> {
    Arc::new(read)
}

/// Snapshot factory over the live members of a tracked instance
pub struct SnapshotFactory<T> {
    readers: Vec<SlotReader<T>>,
}

impl<T> SnapshotFactory<T> {
    pub fn slot_count(&self) -> usize {
        self.readers.len()
    }

    /// Capture every included slot; zero slots yields `Snapshot::Empty`
    pub fn create(&self, source: &dyn SnapshotSource) -> Snapshot<T> {
        if self.readers.is_empty() {
            return Snapshot::Empty;
        }
        Snapshot::from_values(self.readers.iter().map(|read| read(source)).collect())
    }
}

impl<T> fmt::Debug for SnapshotFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotFactory")
            .field("slots", &self.readers.len())
            .finish()
    }
}

/// Builds shadow values from a materialized row, defaulting absent columns
pub struct ShadowValuesFactory {
    readers: Vec<RowReader>,
}

impl ShadowValuesFactory {
    pub fn slot_count(&self) -> usize {
        self.readers.len()
    }

    pub fn create(&self, row: &ValueBuffer) -> Snapshot<Value> {
        if self.readers.is_empty() {
            return Snapshot::Empty;
        }
        Snapshot::from_values(self.readers.iter().map(|read| read(row)).collect())
    }
}

impl fmt::Debug for ShadowValuesFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowValuesFactory")
            .field("slots", &self.readers.len())
            .finish()
    }
}

/// The three factories of one entity shape
#[derive(Debug)]
pub struct SnapshotFactories {
    pub original_values: SnapshotFactory<Value>,
    pub relationship: SnapshotFactory<MemberValue>,
    pub shadow_values: ShadowValuesFactory,
}

fn scalar_reader(access: MemberAccess) -> SlotReader<Value> {
    match access {
        MemberAccess::Field(i) => reader(move |s| s.scalar(i)),
        MemberAccess::Shadow(i) => reader(move |s| s.shadow(i)),
        MemberAccess::Reference(_) | MemberAccess::Collection(_) => reader(|_| Value::Null),
    }
}

fn member_reader(access: MemberAccess) -> SlotReader<MemberValue> {
    match access {
        MemberAccess::Field(i) => reader(move |s| MemberValue::Scalar(s.scalar(i))),
        MemberAccess::Shadow(i) => reader(move |s| MemberValue::Scalar(s.shadow(i))),
        MemberAccess::Reference(i) => reader(move |s| MemberValue::Reference(s.reference(i))),
        MemberAccess::Collection(i) => reader(move |s| MemberValue::Collection(s.collection(i))),
    }
}

/// Order `(slot, reader)` pairs into a dense table
fn by_slot<R>(mut slots: Vec<(usize, R)>) -> Vec<R> {
    slots.sort_by_key(|(slot, _)| *slot);
    slots.into_iter().map(|(_, read)| read).collect()
}

impl SnapshotFactories {
    pub(crate) fn for_shape(
        properties: &[&Property],
        navigations: &[&Navigation],
        counts: ShapeCounts,
    ) -> Self {
        let original = by_slot(
            properties
                .iter()
                .filter_map(|p| p.original_value_index().map(|slot| (slot, scalar_reader(p.access()))))
                .collect(),
        );

        let mut relationship: Vec<(usize, SlotReader<MemberValue>)> = properties
            .iter()
            .filter_map(|p| p.relationship_index().map(|slot| (slot, member_reader(p.access()))))
            .collect();
        relationship.extend(
            navigations
                .iter()
                .map(|n| (n.relationship_index(), member_reader(n.access()))),
        );

        let shadow = by_slot(
            properties
                .iter()
                .filter_map(|p| match p.access() {
                    MemberAccess::Shadow(slot) => {
                        let ordinal = p.index();
                        let default = p.default_value();
                        let read: RowReader = Arc::new(move |row: &ValueBuffer| {
                            row.get(ordinal).cloned().unwrap_or_else(|| default.clone())
                        });
                        Some((slot, read))
                    }
                    _ => None,
                })
                .collect(),
        );

        debug_assert_eq!(original.len(), counts.original_values);
        debug_assert_eq!(relationship.len(), counts.relationship);
        debug_assert_eq!(shadow.len(), counts.shadow);

        Self {
            original_values: SnapshotFactory { readers: original },
            relationship: SnapshotFactory {
                readers: by_slot(relationship),
            },
            shadow_values: ShadowValuesFactory { readers: shadow },
        }
    }
}
