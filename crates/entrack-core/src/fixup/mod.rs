//! Navigation fixup
//!
//! Keeps both sides of every relationship consistent: foreign-key values,
//! the dependent's reference to its principal, and the principal's
//! reference or collection holding its dependents.
//!
//! Each trigger runs inside a [`CriticalSection`]. A trigger raised by a
//! write the fixer itself performs is dropped while the section is held; the
//! identity and dependents maps are still maintained for such writes, so
//! only the navigation bookkeeping is skipped.
//!
//! Navigation writes made here bypass change detection and are mirrored into
//! the relationship snapshot of the entry written to.

mod critical_section;

pub use critical_section::{CriticalSection, FixupStats, SectionGuard};

use std::sync::Arc;

use crate::entry::EntityState;
use crate::errors::Result;
use crate::graph::InstanceId;
use crate::model::{ForeignKeyId, KeyId, NavigationId, PropertyId, Value};
use crate::state_manager::StateManager;

impl StateManager {
    /// Run `body` inside the fixup section; `Ok(false)` when it was dropped
    fn run_fixup(&mut self, body: impl FnOnce(&mut Self) -> Result<()>) -> Result<bool> {
        let Some(_guard) = self.fixup.try_enter() else {
            tracing::trace!("fixup dropped, another fixup is running");
            return Ok(false);
        };
        body(self).map(|()| true)
    }

    // ===== Triggers =====

    pub(crate) fn fixup_state_changed(
        &mut self,
        id: InstanceId,
        old_state: EntityState,
        from_query: bool,
    ) -> Result<()> {
        let new_state = self.state(id);
        if from_query {
            self.run_fixup(|sm| sm.initial_fixup(id, true))?;
        } else if old_state == EntityState::Detached && new_state != EntityState::Detached {
            self.run_fixup(|sm| sm.initial_fixup(id, false))?;
        } else if old_state == EntityState::Deleted && new_state == EntityState::Detached {
            self.run_fixup(|sm| sm.delete_fixup(id))?;
        }
        Ok(())
    }

    pub(crate) fn on_key_property_changed(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        keys: &[KeyId],
        foreign_keys: &[ForeignKeyId],
    ) -> Result<()> {
        if !self.is_tracked(id) {
            return Ok(());
        }
        self.run_fixup(|sm| sm.key_property_changed(id, property, keys, foreign_keys))?;
        Ok(())
    }

    /// A single-valued navigation of `id` moved from `old` to `new`
    ///
    /// An untracked `new` target is attached as Added once the fixup is done.
    pub(crate) fn on_navigation_reference_changed(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        old: Option<InstanceId>,
        new: Option<InstanceId>,
    ) -> Result<()> {
        let untracked = new.filter(|t| !self.is_tracked(*t));
        let ran = self.run_fixup(|sm| sm.navigation_reference_changed(id, navigation, old, new))?;
        if !ran {
            return Ok(());
        }
        self.table.set_relationship_reference(id, navigation, new);
        if let Some(target) = untracked {
            self.attach_untracked(target)?;
        }
        Ok(())
    }

    pub(crate) fn on_navigation_collection_changed(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        added: Vec<InstanceId>,
        removed: Vec<InstanceId>,
    ) -> Result<()> {
        let untracked: Vec<InstanceId> = added
            .iter()
            .copied()
            .filter(|t| !self.is_tracked(*t))
            .collect();
        let ran = self.run_fixup(|sm| sm.navigation_collection_changed(id, navigation, &added, &removed))?;
        if !ran {
            return Ok(());
        }
        for target in &removed {
            self.table.remove_from_collection_snapshot(id, navigation, *target);
        }
        for target in &added {
            self.table.add_to_collection_snapshot(id, navigation, *target);
        }
        for target in untracked {
            self.attach_untracked(target)?;
        }
        Ok(())
    }

    // ===== Bodies =====

    /// Wire a newly tracked entry to the tracked entries around it
    ///
    /// Entries materialized from a query, or made Unchanged, trust their
    /// foreign-key values; any other entry also replays its navigations.
    /// Unchanged entries still remember untracked navigation targets so the
    /// targets are wired up when they are tracked.
    fn initial_fixup(&mut self, id: InstanceId, from_query: bool) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(shape) = self.table.entity_type(id) else {
            return Ok(());
        };
        let foreign_keys = shape.foreign_keys().to_vec();
        let referencing = shape.referencing_foreign_keys().to_vec();
        let navigations = shape.navigations().to_vec();
        let state = self.state(id);
        tracing::trace!(instance = %id, from_query = from_query, "initial fixup");

        for fk_id in foreign_keys {
            let fk = model.foreign_key(fk_id);
            if let Some(principal) = self.snapshot_principal_of(id, fk_id) {
                self.set_navigation(id, fk.dependent_to_principal(), Some(principal));
                self.to_dependent_fixup(id, principal, fk_id)?;
            } else if let Some(nav) = fk.dependent_to_principal() {
                if let Some(target) = self.table.reference(id, nav).filter(|t| !self.is_tracked(*t)) {
                    self.record_referenced_untracked(target, nav, id);
                }
            }
        }

        for fk_id in referencing {
            let fk = model.foreign_key(fk_id);
            let dependents: Vec<InstanceId> = self
                .dependents_of(id, fk_id)
                .into_iter()
                .filter(|d| *d != id)
                .collect();
            if fk.is_unique() {
                if let Some(dependent) = dependents.first() {
                    self.set_navigation(id, fk.principal_to_dependent(), Some(*dependent));
                    self.set_navigation(*dependent, fk.dependent_to_principal(), Some(id));
                }
            } else {
                for dependent in dependents {
                    if let Some(nav) = fk.principal_to_dependent() {
                        self.add_to_collection_navigation(id, nav, dependent);
                    }
                    self.set_navigation(dependent, fk.dependent_to_principal(), Some(id));
                }
            }
        }

        for (referrer, nav) in self.recorded_referrers(id, true) {
            self.delayed_fixup(referrer, nav, id, from_query)?;
        }

        if from_query {
            return Ok(());
        }
        if state == EntityState::Unchanged {
            for nav in navigations {
                self.record_untracked_targets(id, nav);
            }
            return Ok(());
        }
        for nav in navigations {
            if !self.is_tracked(id) {
                break;
            }
            if model.navigation(nav).is_collection() {
                let items = self.table.collection(id, nav).to_vec();
                if !items.is_empty() {
                    self.navigation_collection_changed(id, nav, &items, &[])?;
                }
            } else if let Some(target) = self.table.reference(id, nav) {
                self.navigation_reference_changed(id, nav, None, Some(target))?;
            }
        }
        Ok(())
    }

    fn record_untracked_targets(&mut self, id: InstanceId, navigation: NavigationId) {
        let targets: Vec<InstanceId> = if self.model().navigation(navigation).is_collection() {
            self.table.collection(id, navigation).to_vec()
        } else {
            self.table.reference(id, navigation).into_iter().collect()
        };
        for target in targets {
            if !self.is_tracked(target) {
                self.record_referenced_untracked(target, navigation, id);
            }
        }
    }

    /// Fixup owed to `referrer` from when `referenced` was still untracked
    fn delayed_fixup(
        &mut self,
        referrer: InstanceId,
        navigation: NavigationId,
        referenced: InstanceId,
        from_query: bool,
    ) -> Result<()> {
        if !self.is_tracked(referrer) {
            return Ok(());
        }
        let model = Arc::clone(self.model());
        let nav = model.navigation(navigation);
        let fk = nav.foreign_key();
        let set_modified = self.state(referenced) != EntityState::Unchanged;
        let still_linked = if nav.is_collection() {
            self.table.collection_contains(referrer, navigation, referenced)
        } else {
            self.table.reference(referrer, navigation) == Some(referenced)
        };
        if !still_linked {
            return Ok(());
        }
        tracing::trace!(referrer = %referrer, referenced = %referenced, "delayed fixup");
        if nav.is_dependent_to_principal() {
            self.fixup_to_principal(referrer, referenced, fk, set_modified, from_query)
        } else {
            self.fixup_to_dependent(referrer, referenced, fk, set_modified, from_query)
        }
    }

    fn delete_fixup(&mut self, id: InstanceId) -> Result<()> {
        let model = Arc::clone(self.model());
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return Ok(());
        };
        for other in self.entries() {
            let Some(shape) = self.table.entity_type(other) else {
                continue;
            };
            let navigations: Vec<NavigationId> = shape
                .navigations()
                .iter()
                .copied()
                .filter(|n| model.is_assignable_from(model.navigation(*n).target_type(), ty))
                .collect();
            for nav in navigations {
                if model.navigation(nav).is_collection() {
                    if self.table.collection_contains(other, nav, id) {
                        self.remove_from_collection_navigation(other, nav, id);
                    }
                } else if self.table.reference(other, nav) == Some(id) {
                    self.set_navigation(other, Some(nav), None);
                }
            }
        }
        tracing::trace!(instance = %id, "delete fixup");
        Ok(())
    }

    fn key_property_changed(
        &mut self,
        id: InstanceId,
        property: PropertyId,
        keys: &[KeyId],
        foreign_keys: &[ForeignKeyId],
    ) -> Result<()> {
        let model = Arc::clone(self.model());

        for fk_id in foreign_keys {
            let fk = model.foreign_key(*fk_id);
            let new_principal = self.principal_of(id, *fk_id);
            let old_principal = self.snapshot_principal_of(id, *fk_id);

            if let Some(to_dependents) = fk.principal_to_dependent() {
                if let Some(old) = old_principal {
                    if self.state(old) != EntityState::Deleted {
                        self.reset_reference_or_remove_collection(old, to_dependents, id);
                    }
                }
                if let Some(new) = new_principal {
                    if !self.table.is_conceptual_null(id, property) {
                        self.set_reference_or_add_to_collection(new, to_dependents, id);
                    }
                }
            }

            if let Some(to_principal) = fk.dependent_to_principal() {
                if let Some(new) = new_principal {
                    if fk.is_unique() {
                        let previous = self.dependents_of(new, *fk_id).into_iter().find(|d| *d != id);
                        if let Some(previous) = previous {
                            self.steal_reference(*fk_id, previous)?;
                        }
                    }
                    self.set_navigation(id, Some(to_principal), Some(new));
                } else if let Some(old) = old_principal {
                    if self.table.reference(id, to_principal) == Some(old) {
                        self.set_navigation(id, Some(to_principal), None);
                    }
                }
            }
        }

        for key_id in keys {
            for fk_id in model.key(*key_id).referencing_foreign_keys() {
                let fk = model.foreign_key(*fk_id);
                for dependent in self.snapshot_dependents_of(id, *fk_id) {
                    self.set_foreign_key_properties(dependent, id, *fk_id, true)?;
                }
                // dependents whose foreign key already held the new value
                for dependent in self.dependents_of(id, *fk_id) {
                    self.set_navigation(dependent, fk.dependent_to_principal(), Some(id));
                    if let Some(to_dependents) = fk.principal_to_dependent() {
                        self.set_reference_or_add_to_collection(id, to_dependents, dependent);
                    }
                }
            }
        }
        Ok(())
    }

    fn navigation_reference_changed(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        old: Option<InstanceId>,
        new: Option<InstanceId>,
    ) -> Result<()> {
        let model = Arc::clone(self.model());
        let nav = model.navigation(navigation);
        let fk_id = nav.foreign_key();
        let fk = model.foreign_key(fk_id);
        let inverse = nav.inverse();
        let old_target = old.filter(|t| self.is_tracked(*t));
        let new_target = new.filter(|t| self.is_tracked(*t));

        if nav.is_dependent_to_principal() {
            if let Some(principal) = new_target {
                if fk.is_unique() {
                    let previous = self.dependents_of(principal, fk_id).into_iter().find(|d| *d != id);
                    if let Some(previous) = previous {
                        self.steal_reference(fk_id, previous)?;
                    }
                }
                self.set_foreign_key_properties(id, principal, fk_id, true)?;
            } else if new.is_none() {
                self.conditionally_null_foreign_key(id, old_target, fk_id)?;
            }
            if let Some(inverse) = inverse {
                if let Some(old) = old_target {
                    self.reset_reference_or_remove_collection(old, inverse, id);
                }
                if let Some(new) = new_target {
                    self.set_reference_or_add_to_collection(new, inverse, id);
                }
            }
        } else {
            if let Some(old) = old_target {
                self.conditionally_null_foreign_key(old, Some(id), fk_id)?;
                if let Some(inverse) = inverse {
                    if self.table.reference(old, inverse) == Some(id) {
                        self.set_navigation(old, Some(inverse), None);
                    }
                }
            }
            if let Some(dependent) = new_target {
                let previous = self
                    .principal_of(dependent, fk_id)
                    .or_else(|| self.snapshot_principal_of(dependent, fk_id));
                if let Some(previous) = previous.filter(|p| *p != id) {
                    self.set_navigation(previous, Some(navigation), None);
                }
                self.set_foreign_key_properties(dependent, id, fk_id, true)?;
                self.set_navigation(dependent, inverse, Some(id));
            }
        }

        if let (Some(target), None) = (new, new_target) {
            self.record_referenced_untracked(target, navigation, id);
        }
        Ok(())
    }

    fn navigation_collection_changed(
        &mut self,
        id: InstanceId,
        navigation: NavigationId,
        added: &[InstanceId],
        removed: &[InstanceId],
    ) -> Result<()> {
        let model = Arc::clone(self.model());
        let nav = model.navigation(navigation);
        let fk_id = nav.foreign_key();
        let inverse = nav.inverse();

        for dependent in removed {
            if !self.is_tracked(*dependent) {
                continue;
            }
            self.conditionally_null_foreign_key(*dependent, Some(id), fk_id)?;
            if let Some(inverse) = inverse {
                if self.table.reference(*dependent, inverse) == Some(id) {
                    self.set_navigation(*dependent, Some(inverse), None);
                }
            }
        }

        for dependent in added {
            if !self.is_tracked(*dependent) {
                self.record_referenced_untracked(*dependent, navigation, id);
                continue;
            }
            let previous = self.snapshot_principal_of(*dependent, fk_id);
            if let Some(previous) = previous.filter(|p| *p != id) {
                self.remove_from_collection_navigation(previous, navigation, *dependent);
            }
            self.set_foreign_key_properties(*dependent, id, fk_id, true)?;
            self.set_navigation(*dependent, inverse, Some(id));
        }
        Ok(())
    }

    // ===== Steps =====

    fn fixup_to_principal(
        &mut self,
        dependent: InstanceId,
        principal: InstanceId,
        fk: ForeignKeyId,
        set_modified: bool,
        from_query: bool,
    ) -> Result<()> {
        if !from_query {
            self.set_foreign_key_properties(dependent, principal, fk, set_modified)?;
        }
        let to_principal = self.model().foreign_key(fk).dependent_to_principal();
        self.set_navigation(dependent, to_principal, Some(principal));
        self.to_dependent_fixup(dependent, principal, fk)
    }

    fn fixup_to_dependent(
        &mut self,
        principal: InstanceId,
        dependent: InstanceId,
        fk: ForeignKeyId,
        set_modified: bool,
        from_query: bool,
    ) -> Result<()> {
        if !from_query {
            self.set_foreign_key_properties(dependent, principal, fk, set_modified)?;
        }
        let to_principal = self.model().foreign_key(fk).dependent_to_principal();
        self.set_navigation(dependent, to_principal, Some(principal));
        Ok(())
    }

    /// Point the principal's navigation at `dependent`, evicting whoever
    /// held a unique slot before
    fn to_dependent_fixup(&mut self, dependent: InstanceId, principal: InstanceId, fk: ForeignKeyId) -> Result<()> {
        let model = Arc::clone(self.model());
        let foreign_key = model.foreign_key(fk);
        let Some(to_dependents) = foreign_key.principal_to_dependent() else {
            return Ok(());
        };
        if foreign_key.is_unique() {
            let previous = self
                .table
                .reference(principal, to_dependents)
                .filter(|p| *p != dependent && self.is_tracked(*p));
            if let Some(previous) = previous {
                self.steal_reference(fk, previous)?;
            }
            self.set_navigation(principal, Some(to_dependents), Some(dependent));
        } else {
            self.add_to_collection_navigation(principal, to_dependents, dependent);
        }
        Ok(())
    }

    /// Evict `dependent` from a unique relationship another dependent now holds
    fn steal_reference(&mut self, fk: ForeignKeyId, dependent: InstanceId) -> Result<()> {
        tracing::debug!(dependent = %dependent, "unique reference stolen");
        let to_principal = self.model().foreign_key(fk).dependent_to_principal();
        self.set_navigation(dependent, to_principal, None);
        self.null_foreign_key(dependent, fk)
    }

    /// Null the foreign key of `dependent` unless it already points elsewhere
    fn conditionally_null_foreign_key(
        &mut self,
        dependent: InstanceId,
        principal: Option<InstanceId>,
        fk: ForeignKeyId,
    ) -> Result<()> {
        if !self.is_tracked(dependent) {
            return Ok(());
        }
        if let Some(current) = self.principal_of(dependent, fk) {
            if Some(current) != principal {
                return Ok(());
            }
        }
        if let Some(principal) = principal {
            let model = Arc::clone(self.model());
            let foreign_key = model.foreign_key(fk);
            let matches = model
                .key(foreign_key.principal_key())
                .properties()
                .iter()
                .zip(foreign_key.properties())
                .all(|(pp, dp)| {
                    self.table.current_value(principal, *pp) == self.table.current_value(dependent, *dp)
                });
            if !matches {
                return Ok(());
            }
        }
        self.null_foreign_key(dependent, fk)
    }

    /// Null every non-key foreign-key column; a required relationship whose
    /// columns are all key columns orphans the dependent instead
    fn null_foreign_key(&mut self, dependent: InstanceId, fk: ForeignKeyId) -> Result<()> {
        let model = Arc::clone(self.model());
        let foreign_key = model.foreign_key(fk);
        let mut only_key_properties = true;
        for p in foreign_key.properties() {
            if model.property(*p).is_key() {
                continue;
            }
            only_key_properties = false;
            if !self.is_tracked(dependent) {
                break;
            }
            self.set_property_internal(dependent, *p, Value::Null, true, false)?;
            self.update_dependents_map(dependent, fk);
        }
        if foreign_key.is_required() && only_key_properties {
            let target = match self.state(dependent) {
                EntityState::Added => Some(EntityState::Detached),
                EntityState::Unchanged | EntityState::Modified => Some(EntityState::Deleted),
                EntityState::Deleted | EntityState::Detached => None,
            };
            if let Some(target) = target {
                tracing::debug!(dependent = %dependent, new_state = %target, "identifying dependent orphaned");
                self.change_state(dependent, target, false, true)?;
            }
        }
        Ok(())
    }

    /// Copy the principal's key into the dependent's foreign key
    ///
    /// A temporary principal value stays temporary on the dependent.
    fn set_foreign_key_properties(
        &mut self,
        dependent: InstanceId,
        principal: InstanceId,
        fk: ForeignKeyId,
        set_modified: bool,
    ) -> Result<()> {
        let model = Arc::clone(self.model());
        let foreign_key = model.foreign_key(fk);
        let pairs = model
            .key(foreign_key.principal_key())
            .properties()
            .iter()
            .zip(foreign_key.properties());
        for (pp, dp) in pairs {
            let principal_value = self.table.current_value(principal, *pp);
            let dependent_value = self.table.current_value(dependent, *dp);
            let null_flagged = self.table.is_conceptual_null(dependent, *dp) && !principal_value.is_null();
            if principal_value == dependent_value && !null_flagged {
                continue;
            }
            if self.table.has_temporary_value(principal, *pp) {
                self.write_temporary_value(dependent, *dp, principal_value.clone(), set_modified)?;
            } else {
                self.set_property_internal(dependent, *dp, principal_value.clone(), set_modified, false)?;
            }
            self.update_dependents_map(dependent, fk);
            if self.is_tracked(dependent) {
                self.table.set_relationship_value(dependent, *dp, principal_value);
            }
        }
        Ok(())
    }

    // ===== Navigation writes =====

    fn set_navigation(&mut self, id: InstanceId, navigation: Option<NavigationId>, target: Option<InstanceId>) {
        let Some(navigation) = navigation else {
            return;
        };
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return;
        };
        if !self.model().has_navigation(ty, navigation) {
            return;
        }
        self.with_detection_suspended(|sm| sm.table.write_reference(id, navigation, target));
        if self.is_tracked(id) {
            self.table.set_relationship_reference(id, navigation, target);
        }
    }

    fn add_to_collection_navigation(&mut self, id: InstanceId, navigation: NavigationId, target: InstanceId) {
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return;
        };
        if !self.model().has_navigation(ty, navigation) {
            return;
        }
        self.with_detection_suspended(|sm| sm.table.collection_add(id, navigation, target));
        if self.is_tracked(id) {
            self.table.add_to_collection_snapshot(id, navigation, target);
        }
    }

    fn remove_from_collection_navigation(&mut self, id: InstanceId, navigation: NavigationId, target: InstanceId) {
        let Some(ty) = self.table.get(id).map(|e| e.entity_type()) else {
            return;
        };
        if !self.model().has_navigation(ty, navigation) {
            return;
        }
        self.with_detection_suspended(|sm| sm.table.collection_remove(id, navigation, target));
        if self.is_tracked(id) {
            self.table.remove_from_collection_snapshot(id, navigation, target);
        }
    }

    fn set_reference_or_add_to_collection(&mut self, id: InstanceId, navigation: NavigationId, target: InstanceId) {
        if self.model().navigation(navigation).is_collection() {
            self.add_to_collection_navigation(id, navigation, target);
        } else {
            self.set_navigation(id, Some(navigation), Some(target));
        }
    }

    fn reset_reference_or_remove_collection(&mut self, id: InstanceId, navigation: NavigationId, target: InstanceId) {
        if self.model().navigation(navigation).is_collection() {
            self.remove_from_collection_navigation(id, navigation, target);
        } else if self.table.reference(id, navigation) == Some(target) {
            self.set_navigation(id, Some(navigation), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeleteBehavior, EntityTypeId, Model, ModelBuilder, ValueKind};

    struct BlogModel {
        model: Arc<Model>,
        blog: EntityTypeId,
        post: EntityTypeId,
        blog_id: PropertyId,
        post_id: PropertyId,
        post_blog_id: PropertyId,
        posts: NavigationId,
        post_blog: NavigationId,
    }

    fn blog_model() -> BlogModel {
        let mut b = ModelBuilder::new();
        let blog = b.entity("Blog");
        let blog_id = b.property(blog, "Id", ValueKind::Int).build();
        let blog_pk = b.primary_key(blog, &[blog_id]);
        let post = b.entity("Post");
        let post_id = b.property(post, "Id", ValueKind::Int).build();
        let post_blog_id = b.property(post, "BlogId", ValueKind::Int).nullable().build();
        b.primary_key(post, &[post_id]);
        b.relationship(post, &[post_blog_id], blog_pk)
            .on_delete(DeleteBehavior::ClientSetNull)
            .with_principal_navigation("Blog")
            .with_dependents_navigation("Posts")
            .build();
        let model = Arc::new(b.finish().unwrap());
        let posts = model.find_navigation(blog, "Posts").unwrap();
        let post_blog = model.find_navigation(post, "Blog").unwrap();
        BlogModel {
            model,
            blog,
            post,
            blog_id,
            post_id,
            post_blog_id,
            posts,
            post_blog,
        }
    }

    fn unchanged(sm: &mut StateManager, ty: EntityTypeId, props: &[(PropertyId, i64)]) -> InstanceId {
        let id = sm.create_instance(ty).unwrap();
        for (p, v) in props {
            sm.write_property(id, *p, *v).unwrap();
        }
        sm.set_entity_state(id, EntityState::Unchanged).unwrap();
        id
    }

    #[test]
    fn test_tracking_wires_navigations_from_foreign_keys() {
        let m = blog_model();
        let mut sm = StateManager::new(Arc::clone(&m.model));
        let blog = unchanged(&mut sm, m.blog, &[(m.blog_id, 1)]);
        let post = unchanged(&mut sm, m.post, &[(m.post_id, 10), (m.post_blog_id, 1)]);

        assert_eq!(sm.table().reference(post, m.post_blog), Some(blog));
        assert_eq!(sm.table().collection(blog, m.posts), &[post]);
    }

    #[test]
    fn test_collection_add_sets_foreign_key() {
        let m = blog_model();
        let mut sm = StateManager::new(Arc::clone(&m.model));
        let blog = unchanged(&mut sm, m.blog, &[(m.blog_id, 1)]);
        let post = unchanged(&mut sm, m.post, &[(m.post_id, 10)]);

        sm.add_to_collection(blog, m.posts, post).unwrap();

        assert_eq!(sm.table().current_value(post, m.post_blog_id), Value::Int(1));
        assert_eq!(sm.table().reference(post, m.post_blog), Some(blog));
        assert_eq!(sm.state(post), EntityState::Modified);
    }

    #[test]
    fn test_nested_fixup_is_dropped() {
        let m = blog_model();
        let mut sm = StateManager::new(Arc::clone(&m.model));
        let blog = unchanged(&mut sm, m.blog, &[(m.blog_id, 1)]);
        let post = unchanged(&mut sm, m.post, &[(m.post_id, 10)]);
        sm.reset_fixup_stats();

        sm.set_reference(post, m.post_blog, Some(blog)).unwrap();

        let stats = sm.fixup_stats();
        assert_eq!(stats.max_depth, 1);
        // writing the foreign key raised a key-change trigger inside the fixup
        assert!(stats.dropped >= 1);
        assert_eq!(sm.table().collection(blog, m.posts), &[post]);
    }

    #[test]
    fn test_deleted_principal_is_stripped_from_navigations() {
        let m = blog_model();
        let mut sm = StateManager::new(Arc::clone(&m.model));
        let blog = unchanged(&mut sm, m.blog, &[(m.blog_id, 1)]);
        let post = unchanged(&mut sm, m.post, &[(m.post_id, 10), (m.post_blog_id, 1)]);

        sm.set_entity_state(blog, EntityState::Deleted).unwrap();
        sm.set_entity_state(blog, EntityState::Detached).unwrap();

        assert_eq!(sm.table().reference(post, m.post_blog), None);
    }
}
