//! Fluent construction and one-time finalization of a [`Model`]
//!
//! Builder methods only record drafts; every check happens in
//! [`ModelBuilder::finish`], which also assigns all slot indices and builds
//! the snapshot and key-value factories.

use std::collections::HashSet;

use crate::errors::{Result, TrackerError};
use crate::keys::{KeyShape, KeyValueFactory};
use crate::snapshot::SnapshotFactories;

use super::{
    ChangeTrackingStrategy, DeleteBehavior, EntityType, EntityTypeId, ForeignKey, ForeignKeyId,
    Key, KeyId, MemberAccess, Model, Navigation, NavigationId, Property, PropertyId, SaveBehavior,
    ShapeCounts, ValueGenerated, ValueKind,
};

#[derive(Debug, Clone)]
struct TypeDraft {
    name: String,
    base: Option<EntityTypeId>,
    strategy: ChangeTrackingStrategy,
    properties: Vec<PropertyId>,
}

#[derive(Debug, Clone)]
struct PropertyDraft {
    name: String,
    declaring_type: EntityTypeId,
    kind: ValueKind,
    nullable: bool,
    shadow: bool,
    value_generated: ValueGenerated,
    before_save: Option<SaveBehavior>,
    after_save: Option<SaveBehavior>,
    concurrency_token: bool,
}

#[derive(Debug, Clone)]
struct KeyDraft {
    declaring_type: EntityTypeId,
    properties: Vec<PropertyId>,
    is_primary: bool,
}

#[derive(Debug, Clone)]
struct ForeignKeyDraft {
    declaring_type: EntityTypeId,
    properties: Vec<PropertyId>,
    principal_key: KeyId,
    principal_type: Option<EntityTypeId>,
    unique: bool,
    required: Option<bool>,
    delete_behavior: Option<DeleteBehavior>,
    to_principal: Option<String>,
    to_dependents: Option<String>,
}

#[derive(Debug, Default)]
pub struct ModelBuilder {
    types: Vec<TypeDraft>,
    properties: Vec<PropertyDraft>,
    keys: Vec<KeyDraft>,
    foreign_keys: Vec<ForeignKeyDraft>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root entity type diffed by snapshot
    pub fn entity(&mut self, name: impl Into<String>) -> EntityTypeId {
        self.entity_with_strategy(name, ChangeTrackingStrategy::Snapshot)
    }

    pub fn entity_with_strategy(
        &mut self,
        name: impl Into<String>,
        strategy: ChangeTrackingStrategy,
    ) -> EntityTypeId {
        self.types.push(TypeDraft {
            name: name.into(),
            base: None,
            strategy,
            properties: Vec::new(),
        });
        EntityTypeId(self.types.len() - 1)
    }

    /// Add a type deriving from `base`; it shares the root's keys and strategy
    pub fn derived_entity(&mut self, name: impl Into<String>, base: EntityTypeId) -> EntityTypeId {
        let strategy = self
            .types
            .get(base.0)
            .map(|t| t.strategy)
            .unwrap_or_default();
        self.types.push(TypeDraft {
            name: name.into(),
            base: Some(base),
            strategy,
            properties: Vec::new(),
        });
        EntityTypeId(self.types.len() - 1)
    }

    pub fn property(
        &mut self,
        entity_type: EntityTypeId,
        name: impl Into<String>,
        kind: ValueKind,
    ) -> PropertyBuilder<'_> {
        PropertyBuilder {
            builder: self,
            draft: PropertyDraft {
                name: name.into(),
                declaring_type: entity_type,
                kind,
                nullable: false,
                shadow: false,
                value_generated: ValueGenerated::Never,
                before_save: None,
                after_save: None,
                concurrency_token: false,
            },
        }
    }

    pub fn primary_key(&mut self, entity_type: EntityTypeId, properties: &[PropertyId]) -> KeyId {
        self.add_key(entity_type, properties, true)
    }

    pub fn alternate_key(&mut self, entity_type: EntityTypeId, properties: &[PropertyId]) -> KeyId {
        self.add_key(entity_type, properties, false)
    }

    fn add_key(&mut self, entity_type: EntityTypeId, properties: &[PropertyId], is_primary: bool) -> KeyId {
        self.keys.push(KeyDraft {
            declaring_type: entity_type,
            properties: properties.to_vec(),
            is_primary,
        });
        KeyId(self.keys.len() - 1)
    }

    /// Start a relationship whose dependent side is `dependent` with foreign-key
    /// columns `properties`, matched against `principal_key`
    pub fn relationship(
        &mut self,
        dependent: EntityTypeId,
        properties: &[PropertyId],
        principal_key: KeyId,
    ) -> RelationshipBuilder<'_> {
        RelationshipBuilder {
            builder: self,
            draft: ForeignKeyDraft {
                declaring_type: dependent,
                properties: properties.to_vec(),
                principal_key,
                principal_type: None,
                unique: false,
                required: None,
                delete_behavior: None,
                to_principal: None,
                to_dependents: None,
            },
        }
    }

    /// Validate the drafts and produce the immutable model
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidModel` when a handle is dangling, a root
    /// type has no primary key, a key is declared on a derived type, or a
    /// foreign key disagrees with its principal key in arity or value kind.
    pub fn finish(self) -> Result<Model> {
        self.validate()?;

        let roots: Vec<EntityTypeId> = (0..self.types.len())
            .map(|i| self.root_of(EntityTypeId(i)))
            .collect();

        // Containing keys / foreign keys per property
        let mut property_keys: Vec<Vec<KeyId>> = vec![Vec::new(); self.properties.len()];
        for (i, key) in self.keys.iter().enumerate() {
            for p in &key.properties {
                property_keys[p.0].push(KeyId(i));
            }
        }
        let mut property_fks: Vec<Vec<ForeignKeyId>> = vec![Vec::new(); self.properties.len()];
        for (i, fk) in self.foreign_keys.iter().enumerate() {
            for p in &fk.properties {
                property_fks[p.0].push(ForeignKeyId(i));
            }
        }

        // Navigations implied by relationships
        let mut navigations: Vec<Navigation> = Vec::new();
        let mut declared_navs: Vec<Vec<NavigationId>> = vec![Vec::new(); self.types.len()];
        let mut fk_navs: Vec<(Option<NavigationId>, Option<NavigationId>)> = Vec::new();
        for (i, fk) in self.foreign_keys.iter().enumerate() {
            let principal_type = self.principal_type_of(fk);
            let to_principal = fk.to_principal.as_ref().map(|name| {
                let id = NavigationId(navigations.len());
                navigations.push(Navigation {
                    id,
                    name: name.clone(),
                    declaring_type: fk.declaring_type,
                    target_type: principal_type,
                    foreign_key: ForeignKeyId(i),
                    on_dependent: true,
                    access: MemberAccess::Reference(0),
                    relationship_index: 0,
                    inverse: None,
                });
                declared_navs[fk.declaring_type.0].push(id);
                id
            });
            let to_dependents = fk.to_dependents.as_ref().map(|name| {
                let id = NavigationId(navigations.len());
                let access = if fk.unique {
                    MemberAccess::Reference(0)
                } else {
                    MemberAccess::Collection(0)
                };
                navigations.push(Navigation {
                    id,
                    name: name.clone(),
                    declaring_type: principal_type,
                    target_type: fk.declaring_type,
                    foreign_key: ForeignKeyId(i),
                    on_dependent: false,
                    access,
                    relationship_index: 0,
                    inverse: None,
                });
                declared_navs[principal_type.0].push(id);
                id
            });
            if let (Some(a), Some(b)) = (to_principal, to_dependents) {
                navigations[a.0].inverse = Some(b);
                navigations[b.0].inverse = Some(a);
            }
            fk_navs.push((to_principal, to_dependents));
        }

        let mut properties: Vec<Property> = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let is_key = !property_keys[i].is_empty();
                Property {
                    id: PropertyId(i),
                    name: d.name.clone(),
                    declaring_type: d.declaring_type,
                    kind: d.kind,
                    nullable: d.nullable,
                    access: MemberAccess::Field(0),
                    index: 0,
                    original_value_index: None,
                    relationship_index: None,
                    store_generated_index: None,
                    value_generated: d.value_generated,
                    before_save: d.before_save.unwrap_or(SaveBehavior::Save),
                    after_save: d.after_save.unwrap_or(if is_key {
                        SaveBehavior::Throw
                    } else if d.value_generated.for_update() {
                        SaveBehavior::Ignore
                    } else {
                        SaveBehavior::Save
                    }),
                    concurrency_token: d.concurrency_token,
                    keys: property_keys[i].clone(),
                    foreign_keys: property_fks[i].clone(),
                }
            })
            .collect();

        // Slot assignment, base types first (a base always has a smaller id)
        let mut counts: Vec<ShapeCounts> = Vec::with_capacity(self.types.len());
        let mut all_props: Vec<Vec<PropertyId>> = Vec::with_capacity(self.types.len());
        let mut all_navs: Vec<Vec<NavigationId>> = Vec::with_capacity(self.types.len());
        for (t, draft) in self.types.iter().enumerate() {
            let (mut c, mut props, mut navs) = match draft.base {
                Some(base) => (counts[base.0], all_props[base.0].clone(), all_navs[base.0].clone()),
                None => (ShapeCounts::default(), Vec::new(), Vec::new()),
            };
            let strategy = self.types[roots[t].0].strategy;
            for p in &draft.properties {
                let prop = &mut properties[p.0];
                prop.index = c.properties;
                c.properties += 1;
                prop.access = if self.properties[p.0].shadow {
                    c.shadow += 1;
                    MemberAccess::Shadow(c.shadow - 1)
                } else {
                    c.fields += 1;
                    MemberAccess::Field(c.fields - 1)
                };
                let relationship_relevant = !prop.keys.is_empty() || !prop.foreign_keys.is_empty();
                if strategy.uses_eager_snapshots() || relationship_relevant || prop.concurrency_token {
                    prop.original_value_index = Some(c.original_values);
                    c.original_values += 1;
                }
                if relationship_relevant {
                    prop.relationship_index = Some(c.relationship);
                    c.relationship += 1;
                }
                if prop.value_generated.for_add() {
                    prop.store_generated_index = Some(c.store_generated);
                    c.store_generated += 1;
                }
                props.push(*p);
            }
            for n in &declared_navs[t] {
                let nav = &mut navigations[n.0];
                nav.access = match nav.access {
                    MemberAccess::Collection(_) => MemberAccess::Collection(c.fields),
                    _ => MemberAccess::Reference(c.fields),
                };
                c.fields += 1;
                nav.relationship_index = c.relationship;
                c.relationship += 1;
                c.navigations += 1;
                navs.push(*n);
            }
            counts.push(c);
            all_props.push(props);
            all_navs.push(navs);
        }

        let keys: Vec<Key> = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let props: Vec<&Property> = k.properties.iter().map(|p| &properties[p.0]).collect();
                let shape = if props.len() > 1 {
                    KeyShape::Composite
                } else {
                    KeyShape::Simple
                };
                Key {
                    id: KeyId(i),
                    declaring_type: k.declaring_type,
                    properties: k.properties.clone(),
                    is_primary: k.is_primary,
                    referencing_foreign_keys: self
                        .foreign_keys
                        .iter()
                        .enumerate()
                        .filter(|(_, fk)| fk.principal_key.0 == i)
                        .map(|(j, _)| ForeignKeyId(j))
                        .collect(),
                    factory: KeyValueFactory::new(shape, &props),
                }
            })
            .collect();

        let foreign_keys: Vec<ForeignKey> = self
            .foreign_keys
            .iter()
            .enumerate()
            .map(|(i, fk)| {
                let props: Vec<&Property> = fk.properties.iter().map(|p| &properties[p.0]).collect();
                let shape = if props.len() > 1 {
                    KeyShape::Composite
                } else {
                    KeyShape::Simple
                };
                let required = fk
                    .required
                    .unwrap_or_else(|| props.iter().all(|p| !p.nullable));
                ForeignKey {
                    id: ForeignKeyId(i),
                    declaring_type: fk.declaring_type,
                    properties: fk.properties.clone(),
                    principal_key: fk.principal_key,
                    principal_type: self.principal_type_of(fk),
                    unique: fk.unique,
                    required,
                    delete_behavior: fk.delete_behavior.unwrap_or(if required {
                        DeleteBehavior::Cascade
                    } else {
                        DeleteBehavior::ClientSetNull
                    }),
                    dependent_to_principal: fk_navs[i].0,
                    principal_to_dependent: fk_navs[i].1,
                    factory: KeyValueFactory::new(shape, &props),
                }
            })
            .collect();

        let entity_types: Vec<EntityType> = self
            .types
            .iter()
            .enumerate()
            .map(|(t, draft)| {
                let id = EntityTypeId(t);
                let root = roots[t];
                let strategy = self.types[root.0].strategy;
                let type_props: Vec<&Property> =
                    all_props[t].iter().map(|p| &properties[p.0]).collect();
                let type_navs: Vec<&Navigation> =
                    all_navs[t].iter().map(|n| &navigations[n.0]).collect();
                let root_keys: Vec<KeyId> = self
                    .keys
                    .iter()
                    .enumerate()
                    .filter(|(_, k)| k.declaring_type == root)
                    .map(|(i, _)| KeyId(i))
                    .collect();
                let primary_key = root_keys
                    .iter()
                    .copied()
                    .find(|k| self.keys[k.0].is_primary)
                    .unwrap_or(KeyId(0));
                EntityType {
                    id,
                    name: draft.name.clone(),
                    base: draft.base,
                    root,
                    strategy,
                    properties: all_props[t].clone(),
                    navigations: all_navs[t].clone(),
                    keys: root_keys,
                    primary_key,
                    foreign_keys: (0..self.foreign_keys.len())
                        .filter(|i| self.is_assignable(self.foreign_keys[*i].declaring_type, id))
                        .map(ForeignKeyId)
                        .collect(),
                    referencing_foreign_keys: (0..self.foreign_keys.len())
                        .filter(|i| {
                            self.is_assignable(self.principal_type_of(&self.foreign_keys[*i]), id)
                        })
                        .map(ForeignKeyId)
                        .collect(),
                    counts: counts[t],
                    factories: SnapshotFactories::for_shape(&type_props, &type_navs, counts[t]),
                }
            })
            .collect();

        Ok(Model {
            entity_types,
            properties,
            navigations,
            keys,
            foreign_keys,
        })
    }

    fn invalid(reason: impl Into<String>) -> TrackerError {
        TrackerError::InvalidModel {
            reason: reason.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        for (i, t) in self.types.iter().enumerate() {
            if let Some(base) = t.base {
                if base.0 >= i {
                    return Err(Self::invalid(format!(
                        "base type of '{}' must be declared before it",
                        t.name
                    )));
                }
            }
        }
        let mut seen = HashSet::new();
        for t in &self.types {
            if !seen.insert(t.name.as_str()) {
                return Err(Self::invalid(format!("duplicate entity type '{}'", t.name)));
            }
        }

        for (i, t) in self.types.iter().enumerate() {
            let mut names = HashSet::new();
            let mut current = Some(EntityTypeId(i));
            while let Some(ty) = current {
                for p in &self.types[ty.0].properties {
                    if !names.insert(self.properties[p.0].name.as_str()) {
                        return Err(Self::invalid(format!(
                            "duplicate property '{}' on '{}'",
                            self.properties[p.0].name, t.name
                        )));
                    }
                }
                current = self.types[ty.0].base;
            }
        }

        for (i, t) in self.types.iter().enumerate() {
            if t.base.is_none()
                && !self
                    .keys
                    .iter()
                    .any(|k| k.is_primary && k.declaring_type.0 == i)
            {
                return Err(Self::invalid(format!(
                    "entity type '{}' has no primary key",
                    t.name
                )));
            }
        }

        for key in &self.keys {
            let Some(owner) = self.types.get(key.declaring_type.0) else {
                return Err(Self::invalid("key declared on an unknown entity type"));
            };
            if owner.base.is_some() {
                return Err(Self::invalid(format!(
                    "key declared on derived type '{}'; keys belong to the hierarchy root",
                    owner.name
                )));
            }
            if key.properties.is_empty() {
                return Err(Self::invalid(format!("empty key on '{}'", owner.name)));
            }
            for p in &key.properties {
                let Some(prop) = self.properties.get(p.0) else {
                    return Err(Self::invalid(format!("unknown key property on '{}'", owner.name)));
                };
                if prop.declaring_type != key.declaring_type {
                    return Err(Self::invalid(format!(
                        "key property '{}' is not declared on '{}'",
                        prop.name, owner.name
                    )));
                }
            }
        }
        if self
            .types
            .iter()
            .enumerate()
            .any(|(i, _)| self.keys.iter().filter(|k| k.is_primary && k.declaring_type.0 == i).count() > 1)
        {
            return Err(Self::invalid("entity type has more than one primary key"));
        }

        for fk in &self.foreign_keys {
            let Some(dependent) = self.types.get(fk.declaring_type.0) else {
                return Err(Self::invalid("foreign key declared on an unknown entity type"));
            };
            let Some(principal_key) = self.keys.get(fk.principal_key.0) else {
                return Err(Self::invalid(format!(
                    "foreign key on '{}' references an unknown key",
                    dependent.name
                )));
            };
            if let Some(principal_type) = fk.principal_type {
                if principal_type.0 >= self.types.len()
                    || !self.is_assignable(principal_key.declaring_type, principal_type)
                {
                    return Err(Self::invalid(format!(
                        "principal type of foreign key on '{}' does not own the referenced key",
                        dependent.name
                    )));
                }
            }
            if fk.properties.len() != principal_key.properties.len() {
                return Err(Self::invalid(format!(
                    "foreign key on '{}' has {} properties but the principal key has {}",
                    dependent.name,
                    fk.properties.len(),
                    principal_key.properties.len()
                )));
            }
            for (p, pk) in fk.properties.iter().zip(&principal_key.properties) {
                let Some(prop) = self.properties.get(p.0) else {
                    return Err(Self::invalid(format!(
                        "unknown foreign key property on '{}'",
                        dependent.name
                    )));
                };
                if !self.is_assignable(prop.declaring_type, fk.declaring_type) {
                    return Err(Self::invalid(format!(
                        "foreign key property '{}' is not a member of '{}'",
                        prop.name, dependent.name
                    )));
                }
                let principal_prop = &self.properties[pk.0];
                if prop.kind != principal_prop.kind {
                    return Err(Self::invalid(format!(
                        "foreign key property '{}.{}' is {} but principal key property '{}' is {}",
                        dependent.name, prop.name, prop.kind, principal_prop.name, principal_prop.kind
                    )));
                }
            }
        }
        Ok(())
    }

    fn root_of(&self, ty: EntityTypeId) -> EntityTypeId {
        let mut current = ty;
        while let Some(base) = self.types[current.0].base {
            current = base;
        }
        current
    }

    fn is_assignable(&self, base: EntityTypeId, derived: EntityTypeId) -> bool {
        let mut current = Some(derived);
        while let Some(ty) = current {
            if ty == base {
                return true;
            }
            current = self.types.get(ty.0).and_then(|t| t.base);
        }
        false
    }

    fn principal_type_of(&self, fk: &ForeignKeyDraft) -> EntityTypeId {
        fk.principal_type
            .unwrap_or(self.keys[fk.principal_key.0].declaring_type)
    }
}

/// Options for one scalar property; call [`PropertyBuilder::build`] to add it
pub struct PropertyBuilder<'a> {
    builder: &'a mut ModelBuilder,
    draft: PropertyDraft,
}

impl PropertyBuilder<'_> {
    pub fn nullable(mut self) -> Self {
        self.draft.nullable = true;
        self
    }

    /// Store the value in the entry rather than on the instance
    pub fn shadow(mut self) -> Self {
        self.draft.shadow = true;
        self
    }

    pub fn value_generated(mut self, generated: ValueGenerated) -> Self {
        self.draft.value_generated = generated;
        self
    }

    pub fn before_save(mut self, behavior: SaveBehavior) -> Self {
        self.draft.before_save = Some(behavior);
        self
    }

    pub fn after_save(mut self, behavior: SaveBehavior) -> Self {
        self.draft.after_save = Some(behavior);
        self
    }

    pub fn concurrency_token(mut self) -> Self {
        self.draft.concurrency_token = true;
        self
    }

    pub fn build(self) -> PropertyId {
        let id = PropertyId(self.builder.properties.len());
        if let Some(t) = self.builder.types.get_mut(self.draft.declaring_type.0) {
            t.properties.push(id);
        }
        self.builder.properties.push(self.draft);
        id
    }
}

/// Options for one foreign key; call [`RelationshipBuilder::build`] to add it
pub struct RelationshipBuilder<'a> {
    builder: &'a mut ModelBuilder,
    draft: ForeignKeyDraft,
}

impl RelationshipBuilder<'_> {
    /// Principal type when it is a derived type of the key's owner
    pub fn principal_type(mut self, entity_type: EntityTypeId) -> Self {
        self.draft.principal_type = Some(entity_type);
        self
    }

    /// One dependent per principal; the principal-side navigation is single-valued
    pub fn unique(mut self) -> Self {
        self.draft.unique = true;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.draft.required = Some(required);
        self
    }

    pub fn on_delete(mut self, behavior: DeleteBehavior) -> Self {
        self.draft.delete_behavior = Some(behavior);
        self
    }

    /// Navigation on the dependent pointing at its principal
    pub fn with_principal_navigation(mut self, name: impl Into<String>) -> Self {
        self.draft.to_principal = Some(name.into());
        self
    }

    /// Navigation on the principal holding its dependent(s)
    pub fn with_dependents_navigation(mut self, name: impl Into<String>) -> Self {
        self.draft.to_dependents = Some(name.into());
        self
    }

    pub fn build(self) -> ForeignKeyId {
        self.builder.foreign_keys.push(self.draft);
        ForeignKeyId(self.builder.foreign_keys.len() - 1)
    }
}
