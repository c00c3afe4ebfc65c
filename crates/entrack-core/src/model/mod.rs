//! Read-only entity-shape metadata
//!
//! A `Model` is produced once by [`ModelBuilder::finish`] and shared by every
//! tracking context that uses it. All slot indices (property ordinal, field,
//! shadow, original-value, relationship and store-generated slots) are fixed
//! at that point, together with the snapshot and key-value factories built
//! from them.

pub mod builder;
pub mod value;

pub use builder::{ModelBuilder, PropertyBuilder, RelationshipBuilder};
pub use value::{Value, ValueKind};

use crate::errors::{Result, TrackerError};
use crate::keys::KeyValueFactory;
use crate::snapshot::SnapshotFactories;

macro_rules! model_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

model_id!(
    /// Handle to an entity type of a finalized model
    EntityTypeId
);
model_id!(PropertyId);
model_id!(NavigationId);
model_id!(KeyId);
model_id!(ForeignKeyId);

/// How mutations of an entity shape become known to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeTrackingStrategy {
    /// Mutations are found by diffing against snapshots
    #[default]
    Snapshot,
    /// Instances report "changed"; snapshots are still taken eagerly
    ChangedNotifications,
    /// Instances report "changing" and "changed"; original values are captured lazily
    ChangingAndChangedNotifications,
}

impl ChangeTrackingStrategy {
    /// Whether snapshots are captured when tracking starts
    pub fn uses_eager_snapshots(self) -> bool {
        !matches!(self, ChangeTrackingStrategy::ChangingAndChangedNotifications)
    }

    pub fn requires_notifications(self) -> bool {
        !matches!(self, ChangeTrackingStrategy::Snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueGenerated {
    #[default]
    Never,
    OnAdd,
    OnAddOrUpdate,
}

impl ValueGenerated {
    pub fn for_add(self) -> bool {
        !matches!(self, ValueGenerated::Never)
    }

    pub fn for_update(self) -> bool {
        matches!(self, ValueGenerated::OnAddOrUpdate)
    }
}

/// Whether a property value may be sent to the store in a given save window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveBehavior {
    #[default]
    Save,
    Ignore,
    Throw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteBehavior {
    Cascade,
    ClientCascade,
    SetNull,
    #[default]
    ClientSetNull,
    Restrict,
    NoAction,
    ClientNoAction,
}

impl DeleteBehavior {
    pub fn is_cascading(self) -> bool {
        matches!(self, DeleteBehavior::Cascade | DeleteBehavior::ClientCascade)
    }
}

/// Where a member's current value lives, decided once at finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccess {
    /// Scalar property backed by an instance field
    Field(usize),
    /// Scalar property stored in the entry's shadow values
    Shadow(usize),
    /// Single-valued navigation backed by an instance field
    Reference(usize),
    /// Collection navigation backed by an instance field
    Collection(usize),
}

#[derive(Debug, Clone)]
pub struct Property {
    pub(crate) id: PropertyId,
    pub(crate) name: String,
    pub(crate) declaring_type: EntityTypeId,
    pub(crate) kind: ValueKind,
    pub(crate) nullable: bool,
    pub(crate) access: MemberAccess,
    pub(crate) index: usize,
    pub(crate) original_value_index: Option<usize>,
    pub(crate) relationship_index: Option<usize>,
    pub(crate) store_generated_index: Option<usize>,
    pub(crate) value_generated: ValueGenerated,
    pub(crate) before_save: SaveBehavior,
    pub(crate) after_save: SaveBehavior,
    pub(crate) concurrency_token: bool,
    pub(crate) keys: Vec<KeyId>,
    pub(crate) foreign_keys: Vec<ForeignKeyId>,
}

impl Property {
    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> EntityTypeId {
        self.declaring_type
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn access(&self) -> MemberAccess {
        self.access
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self.access, MemberAccess::Shadow(_))
    }

    /// Ordinal within the shape; also the property's column in a materialized row
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn original_value_index(&self) -> Option<usize> {
        self.original_value_index
    }

    pub fn relationship_index(&self) -> Option<usize> {
        self.relationship_index
    }

    pub fn store_generated_index(&self) -> Option<usize> {
        self.store_generated_index
    }

    pub fn value_generated(&self) -> ValueGenerated {
        self.value_generated
    }

    pub fn before_save_behavior(&self) -> SaveBehavior {
        self.before_save
    }

    pub fn after_save_behavior(&self) -> SaveBehavior {
        self.after_save
    }

    pub fn is_concurrency_token(&self) -> bool {
        self.concurrency_token
    }

    pub fn is_key(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn is_foreign_key(&self) -> bool {
        !self.foreign_keys.is_empty()
    }

    pub fn containing_keys(&self) -> &[KeyId] {
        &self.keys
    }

    pub fn containing_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.foreign_keys
    }

    /// The value an unassigned property holds
    pub fn default_value(&self) -> Value {
        if self.nullable {
            Value::Null
        } else {
            self.kind.default_value()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Navigation {
    pub(crate) id: NavigationId,
    pub(crate) name: String,
    pub(crate) declaring_type: EntityTypeId,
    pub(crate) target_type: EntityTypeId,
    pub(crate) foreign_key: ForeignKeyId,
    pub(crate) on_dependent: bool,
    pub(crate) access: MemberAccess,
    pub(crate) relationship_index: usize,
    pub(crate) inverse: Option<NavigationId>,
}

impl Navigation {
    pub fn id(&self) -> NavigationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> EntityTypeId {
        self.declaring_type
    }

    pub fn target_type(&self) -> EntityTypeId {
        self.target_type
    }

    pub fn foreign_key(&self) -> ForeignKeyId {
        self.foreign_key
    }

    pub fn is_dependent_to_principal(&self) -> bool {
        self.on_dependent
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.access, MemberAccess::Collection(_))
    }

    pub fn access(&self) -> MemberAccess {
        self.access
    }

    pub fn relationship_index(&self) -> usize {
        self.relationship_index
    }

    pub fn inverse(&self) -> Option<NavigationId> {
        self.inverse
    }
}

#[derive(Debug, Clone)]
pub struct Key {
    pub(crate) id: KeyId,
    pub(crate) declaring_type: EntityTypeId,
    pub(crate) properties: Vec<PropertyId>,
    pub(crate) is_primary: bool,
    pub(crate) referencing_foreign_keys: Vec<ForeignKeyId>,
    pub(crate) factory: KeyValueFactory,
}

impl Key {
    pub fn id(&self) -> KeyId {
        self.id
    }

    pub fn declaring_type(&self) -> EntityTypeId {
        self.declaring_type
    }

    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn referencing_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.referencing_foreign_keys
    }

    /// Principal-role key value factory
    pub fn factory(&self) -> &KeyValueFactory {
        &self.factory
    }
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub(crate) id: ForeignKeyId,
    pub(crate) declaring_type: EntityTypeId,
    pub(crate) properties: Vec<PropertyId>,
    pub(crate) principal_key: KeyId,
    pub(crate) principal_type: EntityTypeId,
    pub(crate) unique: bool,
    pub(crate) required: bool,
    pub(crate) delete_behavior: DeleteBehavior,
    pub(crate) dependent_to_principal: Option<NavigationId>,
    pub(crate) principal_to_dependent: Option<NavigationId>,
    pub(crate) factory: KeyValueFactory,
}

impl ForeignKey {
    pub fn id(&self) -> ForeignKeyId {
        self.id
    }

    /// The dependent entity type
    pub fn declaring_type(&self) -> EntityTypeId {
        self.declaring_type
    }

    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    pub fn principal_key(&self) -> KeyId {
        self.principal_key
    }

    pub fn principal_type(&self) -> EntityTypeId {
        self.principal_type
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn delete_behavior(&self) -> DeleteBehavior {
        self.delete_behavior
    }

    pub fn dependent_to_principal(&self) -> Option<NavigationId> {
        self.dependent_to_principal
    }

    pub fn principal_to_dependent(&self) -> Option<NavigationId> {
        self.principal_to_dependent
    }

    /// Dependent-role key value factory
    pub fn factory(&self) -> &KeyValueFactory {
        &self.factory
    }
}

/// Slot counts of one entity shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeCounts {
    pub properties: usize,
    pub navigations: usize,
    pub fields: usize,
    pub shadow: usize,
    pub original_values: usize,
    pub relationship: usize,
    pub store_generated: usize,
}

#[derive(Debug)]
pub struct EntityType {
    pub(crate) id: EntityTypeId,
    pub(crate) name: String,
    pub(crate) base: Option<EntityTypeId>,
    pub(crate) root: EntityTypeId,
    pub(crate) strategy: ChangeTrackingStrategy,
    pub(crate) properties: Vec<PropertyId>,
    pub(crate) navigations: Vec<NavigationId>,
    pub(crate) keys: Vec<KeyId>,
    pub(crate) primary_key: KeyId,
    pub(crate) foreign_keys: Vec<ForeignKeyId>,
    pub(crate) referencing_foreign_keys: Vec<ForeignKeyId>,
    pub(crate) counts: ShapeCounts,
    pub(crate) factories: SnapshotFactories,
}

impl EntityType {
    pub fn id(&self) -> EntityTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_type(&self) -> Option<EntityTypeId> {
        self.base
    }

    pub fn root(&self) -> EntityTypeId {
        self.root
    }

    pub fn change_tracking_strategy(&self) -> ChangeTrackingStrategy {
        self.strategy
    }

    /// All properties including inherited ones, in ordinal order
    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    pub fn navigations(&self) -> &[NavigationId] {
        &self.navigations
    }

    /// Keys of the hierarchy root; every type in the hierarchy shares them
    pub fn keys(&self) -> &[KeyId] {
        &self.keys
    }

    pub fn primary_key(&self) -> KeyId {
        self.primary_key
    }

    /// Foreign keys declared on this type or a base type
    pub fn foreign_keys(&self) -> &[ForeignKeyId] {
        &self.foreign_keys
    }

    /// Foreign keys whose principal is this type or a base type
    pub fn referencing_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.referencing_foreign_keys
    }

    pub fn counts(&self) -> ShapeCounts {
        self.counts
    }

    pub fn snapshot_factories(&self) -> &SnapshotFactories {
        &self.factories
    }
}

/// A finalized, immutable model
#[derive(Debug)]
pub struct Model {
    pub(crate) entity_types: Vec<EntityType>,
    pub(crate) properties: Vec<Property>,
    pub(crate) navigations: Vec<Navigation>,
    pub(crate) keys: Vec<Key>,
    pub(crate) foreign_keys: Vec<ForeignKey>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.iter()
    }

    pub fn entity_type(&self, id: EntityTypeId) -> &EntityType {
        &self.entity_types[id.0]
    }

    pub fn property(&self, id: PropertyId) -> &Property {
        &self.properties[id.0]
    }

    pub fn navigation(&self, id: NavigationId) -> &Navigation {
        &self.navigations[id.0]
    }

    pub fn key(&self, id: KeyId) -> &Key {
        &self.keys[id.0]
    }

    pub fn foreign_key(&self, id: ForeignKeyId) -> &ForeignKey {
        &self.foreign_keys[id.0]
    }

    /// Checked lookup; `None` for a handle minted by another model
    pub fn try_foreign_key(&self, id: ForeignKeyId) -> Option<&ForeignKey> {
        self.foreign_keys.get(id.0)
    }

    /// Checked lookup for handles received from callers
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the handle does not belong to this model.
    pub fn try_entity_type(&self, id: EntityTypeId) -> Result<&EntityType> {
        self.entity_types
            .get(id.0)
            .ok_or_else(|| TrackerError::UnknownEntityType {
                entity_type: format!("#{}", id.0),
            })
    }

    pub fn find_entity_type(&self, name: &str) -> Option<EntityTypeId> {
        self.entity_types
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id)
    }

    pub fn find_property(&self, entity_type: EntityTypeId, name: &str) -> Option<PropertyId> {
        self.entity_types
            .get(entity_type.0)?
            .properties
            .iter()
            .copied()
            .find(|p| self.property(*p).name == name)
    }

    pub fn find_navigation(&self, entity_type: EntityTypeId, name: &str) -> Option<NavigationId> {
        self.entity_types
            .get(entity_type.0)?
            .navigations
            .iter()
            .copied()
            .find(|n| self.navigation(*n).name == name)
    }

    /// True when `derived` is `base` or inherits from it
    pub fn is_assignable_from(&self, base: EntityTypeId, derived: EntityTypeId) -> bool {
        let mut current = Some(derived);
        while let Some(ty) = current {
            if ty == base {
                return true;
            }
            current = self.entity_types.get(ty.0).and_then(|t| t.base);
        }
        false
    }

    /// Whether `entity_type` has `property` among its (possibly inherited) properties
    pub fn has_property(&self, entity_type: EntityTypeId, property: PropertyId) -> bool {
        self.properties
            .get(property.0)
            .is_some_and(|p| self.is_assignable_from(p.declaring_type, entity_type))
    }

    pub fn has_navigation(&self, entity_type: EntityTypeId, navigation: NavigationId) -> bool {
        self.navigations
            .get(navigation.0)
            .is_some_and(|n| self.is_assignable_from(n.declaring_type, entity_type))
    }

    /// Display name of a key's or foreign key's property list, e.g. `{BlogId, Slug}`
    pub fn display_properties(&self, properties: &[PropertyId]) -> String {
        let names: Vec<&str> = properties
            .iter()
            .map(|p| self.property(*p).name.as_str())
            .collect();
        format!("{{{}}}", names.join(", "))
    }
}
