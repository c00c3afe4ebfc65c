//! Arena of application-side entity instances
//!
//! Instances stand in for the application's objects: the tracker reads and
//! writes their backed members by field slot, and relationships between them
//! are plain [`InstanceId`] references. Shadow values are not stored here;
//! they live in the tracked entry.

use std::fmt;

use crate::model::{EntityTypeId, MemberAccess, Model, Value};

/// Identity of one application instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u32);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Content of one backed member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberValue {
    Scalar(Value),
    Reference(Option<InstanceId>),
    Collection(Vec<InstanceId>),
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub(crate) entity_type: EntityTypeId,
    pub(crate) fields: Vec<MemberValue>,
    pub(crate) notifying: bool,
}

impl Instance {
    pub fn entity_type(&self) -> EntityTypeId {
        self.entity_type
    }

    /// Whether the instance reports its own property changes
    pub fn provides_notifications(&self) -> bool {
        self.notifying
    }

    pub fn fields(&self) -> &[MemberValue] {
        &self.fields
    }
}

#[derive(Debug, Default)]
pub struct EntityGraph {
    instances: Vec<Instance>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an instance whose backed members hold their defaults
    pub(crate) fn insert(
        &mut self,
        model: &Model,
        entity_type: EntityTypeId,
        notifying: bool,
    ) -> InstanceId {
        let shape = model.entity_type(entity_type);
        let mut fields = vec![MemberValue::Scalar(Value::Null); shape.counts().fields];
        for p in shape.properties() {
            let property = model.property(*p);
            if let MemberAccess::Field(i) = property.access() {
                fields[i] = MemberValue::Scalar(property.default_value());
            }
        }
        for n in shape.navigations() {
            match model.navigation(*n).access() {
                MemberAccess::Reference(i) => fields[i] = MemberValue::Reference(None),
                MemberAccess::Collection(i) => fields[i] = MemberValue::Collection(Vec::new()),
                _ => {}
            }
        }
        self.instances.push(Instance {
            entity_type,
            fields,
            notifying,
        });
        InstanceId((self.instances.len() - 1) as u32)
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.index())
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        id.index() < self.instances.len()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn entity_type(&self, id: InstanceId) -> Option<EntityTypeId> {
        self.get(id).map(|i| i.entity_type)
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        (0..self.instances.len()).map(|i| InstanceId(i as u32))
    }

    pub(crate) fn scalar(&self, id: InstanceId, field: usize) -> Value {
        match self.get(id).and_then(|i| i.fields.get(field)) {
            Some(MemberValue::Scalar(v)) => v.clone(),
            _ => Value::Null,
        }
    }

    pub(crate) fn set_scalar(&mut self, id: InstanceId, field: usize, value: Value) {
        if let Some(slot) = self.field_mut(id, field) {
            *slot = MemberValue::Scalar(value);
        }
    }

    pub(crate) fn reference(&self, id: InstanceId, field: usize) -> Option<InstanceId> {
        match self.get(id).and_then(|i| i.fields.get(field)) {
            Some(MemberValue::Reference(r)) => *r,
            _ => None,
        }
    }

    pub(crate) fn set_reference(&mut self, id: InstanceId, field: usize, target: Option<InstanceId>) {
        if let Some(slot) = self.field_mut(id, field) {
            *slot = MemberValue::Reference(target);
        }
    }

    pub(crate) fn collection(&self, id: InstanceId, field: usize) -> &[InstanceId] {
        match self.get(id).and_then(|i| i.fields.get(field)) {
            Some(MemberValue::Collection(items)) => items,
            _ => &[],
        }
    }

    pub(crate) fn collection_mut(&mut self, id: InstanceId, field: usize) -> Option<&mut Vec<InstanceId>> {
        match self.field_mut(id, field) {
            Some(MemberValue::Collection(items)) => Some(items),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: InstanceId, field: usize) -> Option<&mut MemberValue> {
        self.instances
            .get_mut(id.index())
            .and_then(|i| i.fields.get_mut(field))
    }

    pub(crate) fn clear(&mut self) {
        self.instances.clear();
    }

    /// Drop `id` if it is the most recent allocation
    pub(crate) fn remove_last(&mut self, id: InstanceId) -> bool {
        if id.index() + 1 != self.instances.len() {
            return false;
        }
        self.instances.pop();
        true
    }
}
