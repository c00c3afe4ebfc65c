//! Textual dump of a tracking context

use std::fmt::Write;

use crate::graph::InstanceId;

use super::StateManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugViewMode {
    /// One line per entry: type, key, state
    #[default]
    Short,
    /// Adds every member with its markers
    Long,
}

impl StateManager {
    /// Render every tracked entry in creation order
    ///
    /// Values are shown as held, whatever the sensitive-data setting; the
    /// view is meant for a developer's eyes, not for logs.
    pub fn debug_view(&self, mode: DebugViewMode) -> String {
        let mut out = String::new();
        for id in self.entries() {
            self.write_entry(&mut out, id, mode);
        }
        out
    }

    fn key_text(&self, id: InstanceId) -> String {
        let model = self.model();
        let Some(shape) = self.table.entity_type(id) else {
            return String::from("{}");
        };
        let parts: Vec<String> = model
            .key(shape.primary_key())
            .properties()
            .iter()
            .map(|p| format!("{}: {}", model.property(*p).name(), self.table.current_value(id, *p)))
            .collect();
        format!("{{{}}}", parts.join(", "))
    }

    fn write_entry(&self, out: &mut String, id: InstanceId, mode: DebugViewMode) {
        let model = self.model();
        let Some(shape) = self.table.entity_type(id) else {
            return;
        };
        let _ = writeln!(out, "{} {} {}", shape.name(), self.key_text(id), self.state(id));
        if mode == DebugViewMode::Short {
            return;
        }

        for p in shape.properties() {
            let property = model.property(*p);
            let _ = write!(out, "  {}: {}", property.name(), self.table.current_value(id, *p));
            if property.is_key() {
                out.push_str(" PK");
            }
            if property.is_foreign_key() {
                out.push_str(" FK");
            }
            if self.table.has_temporary_value(id, *p) {
                out.push_str(" Temporary");
            } else if self.table.is_modified(id, *p) {
                let _ = write!(out, " Modified Originally {}", self.table.original_value(id, *p));
            }
            if self.table.is_conceptual_null(id, *p) {
                out.push_str(" ConceptualNull");
            }
            out.push('\n');
        }

        for nav in shape.navigations() {
            let navigation = model.navigation(*nav);
            let targets: Vec<String> = self
                .table
                .navigation_targets(id, *nav)
                .into_iter()
                .map(|t| self.key_text(t))
                .collect();
            if navigation.is_collection() {
                let _ = writeln!(out, "  {}: [{}]", navigation.name(), targets.join(", "));
            } else {
                let target = targets.first().map(String::as_str).unwrap_or("<null>");
                let _ = writeln!(out, "  {}: {}", navigation.name(), target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entry::EntityState;
    use crate::model::{ModelBuilder, ValueKind};

    #[test]
    fn test_short_and_long_views() {
        let mut b = ModelBuilder::new();
        let blog = b.entity("Blog");
        let id = b.property(blog, "Id", ValueKind::Int).build();
        let name = b.property(blog, "Name", ValueKind::Text).nullable().build();
        b.primary_key(blog, &[id]);
        let mut sm = StateManager::new(Arc::new(b.finish().unwrap()));

        let a = sm.create_instance(blog).unwrap();
        sm.write_property(a, id, 1).unwrap();
        sm.write_property(a, name, "old").unwrap();
        sm.set_entity_state(a, EntityState::Unchanged).unwrap();
        sm.set_property(a, name, "new").unwrap();

        assert_eq!(sm.debug_view(DebugViewMode::Short), "Blog {Id: 1} Modified\n");

        let long = sm.debug_view(DebugViewMode::Long);
        assert!(long.contains("  Id: 1 PK\n"));
        assert!(long.contains("  Name: 'new' Modified Originally 'old'\n"));
    }
}
