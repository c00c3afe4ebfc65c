//! Generated values for properties of entries entering `Added`
//!
//! Foreign-key properties are filled by propagation from a resolved principal
//! (see `StateManager`); everything else that is generated on add comes from a
//! [`ValueGenerator`] picked by the [`ValueGeneratorRegistry`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{Result, TrackerError};
use crate::model::{Property, PropertyId, Value, ValueKind};

/// The entity type is left blank; the tracking context names it when the error surfaces
fn generation_error(property: &Property, message: impl Into<String>) -> TrackerError {
    TrackerError::ValueGeneration {
        entity_type: String::new(),
        property: property.name().to_string(),
        message: message.into(),
    }
}

/// Source of values for one generated property
#[async_trait]
pub trait ValueGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns `ValueGeneration` when no value can be produced for `property`.
    fn next(&self, property: &Property) -> Result<Value>;

    /// Awaitable variant for generators backed by an external source
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `cancellation` has fired, otherwise as
    /// [`ValueGenerator::next`].
    async fn next_async(&self, property: &Property, cancellation: &CancellationToken) -> Result<Value> {
        if cancellation.is_cancelled() {
            return Err(TrackerError::Cancelled {
                op: "next_async".to_string(),
            });
        }
        self.next(property)
    }

    /// Whether produced values are placeholders the store replaces on save
    fn generates_temporary_values(&self) -> bool;
}

/// Distinct negative integers, reported as temporary
#[derive(Debug)]
pub struct TemporaryIntGenerator {
    current: AtomicI64,
}

impl Default for TemporaryIntGenerator {
    fn default() -> Self {
        Self {
            current: AtomicI64::new(0),
        }
    }
}

impl TemporaryIntGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueGenerator for TemporaryIntGenerator {
    fn next(&self, property: &Property) -> Result<Value> {
        if property.kind() != ValueKind::Int {
            return Err(generation_error(
                property,
                format!("temporary integers cannot fill a {} property", property.kind()),
            ));
        }
        Ok(Value::Int(self.current.fetch_sub(1, Ordering::Relaxed) - 1))
    }

    fn generates_temporary_values(&self) -> bool {
        true
    }
}

/// Time-ordered UUIDs; permanent
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl ValueGenerator for UuidV7Generator {
    fn next(&self, property: &Property) -> Result<Value> {
        match property.kind() {
            ValueKind::Uuid => Ok(Value::Uuid(Uuid::now_v7())),
            other => Err(generation_error(
                property,
                format!("UUIDs cannot fill a {} property", other),
            )),
        }
    }

    fn generates_temporary_values(&self) -> bool {
        false
    }
}

/// Time-ordered UUIDs rendered as text; permanent
#[derive(Debug, Default, Clone, Copy)]
pub struct TextUuidGenerator;

impl ValueGenerator for TextUuidGenerator {
    fn next(&self, property: &Property) -> Result<Value> {
        match property.kind() {
            ValueKind::Text => Ok(Value::Text(Uuid::now_v7().to_string())),
            other => Err(generation_error(
                property,
                format!("UUID text cannot fill a {} property", other),
            )),
        }
    }

    fn generates_temporary_values(&self) -> bool {
        false
    }
}

/// Picks the generator for a property: a per-property override, else a
/// built-in chosen by value kind
#[derive(Clone)]
pub struct ValueGeneratorRegistry {
    overrides: HashMap<PropertyId, Arc<dyn ValueGenerator>>,
    temporary_int: Arc<TemporaryIntGenerator>,
    uuid: Arc<UuidV7Generator>,
    text_uuid: Arc<TextUuidGenerator>,
}

impl Default for ValueGeneratorRegistry {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            temporary_int: Arc::new(TemporaryIntGenerator::new()),
            uuid: Arc::new(UuidV7Generator),
            text_uuid: Arc::new(TextUuidGenerator),
        }
    }
}

impl ValueGeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_generator(&mut self, property: PropertyId, generator: Arc<dyn ValueGenerator>) {
        self.overrides.insert(property, generator);
    }

    pub fn remove_generator(&mut self, property: PropertyId) -> Option<Arc<dyn ValueGenerator>> {
        self.overrides.remove(&property)
    }

    /// Whether a generator was registered for this property specifically
    pub fn has_generator(&self, property: PropertyId) -> bool {
        self.overrides.contains_key(&property)
    }

    /// `None` when no generator can produce values of the property's kind
    pub fn select(&self, property: &Property) -> Option<Arc<dyn ValueGenerator>> {
        if let Some(generator) = self.overrides.get(&property.id()) {
            return Some(Arc::clone(generator));
        }
        match property.kind() {
            ValueKind::Int => Some(self.temporary_int.clone() as Arc<dyn ValueGenerator>),
            ValueKind::Uuid => Some(self.uuid.clone() as Arc<dyn ValueGenerator>),
            ValueKind::Text => Some(self.text_uuid.clone() as Arc<dyn ValueGenerator>),
            ValueKind::Bool | ValueKind::Binary | ValueKind::Timestamp => None,
        }
    }
}

impl std::fmt::Debug for ValueGeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut overrides: Vec<usize> = self.overrides.keys().map(|p| p.index()).collect();
        overrides.sort_unstable();
        f.debug_struct("ValueGeneratorRegistry")
            .field("overrides", &overrides)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelBuilder};

    fn model() -> (Model, PropertyId, PropertyId, PropertyId) {
        let mut b = ModelBuilder::new();
        let t = b.entity("Doc");
        let id = b.property(t, "Id", ValueKind::Int).build();
        let guid = b.property(t, "Guid", ValueKind::Uuid).build();
        let slug = b.property(t, "Slug", ValueKind::Text).build();
        b.primary_key(t, &[id]);
        (b.finish().unwrap(), id, guid, slug)
    }

    #[test]
    fn test_temporary_ints_are_distinct_and_negative() {
        let (model, id, ..) = model();
        let generator = TemporaryIntGenerator::new();
        let a = generator.next(model.property(id)).unwrap();
        let b = generator.next(model.property(id)).unwrap();
        assert_ne!(a, b);
        assert!(a.as_int().unwrap() < 0);
        assert!(generator.generates_temporary_values());
        assert!(b.as_int().unwrap() < 0);
    }

    #[test]
    fn test_kind_mismatch_is_generation_error() {
        let (model, _, guid, _) = model();
        let err = TemporaryIntGenerator::new()
            .next(model.property(guid))
            .unwrap_err();
        assert!(matches!(err, TrackerError::ValueGeneration { .. }));
    }

    #[test]
    fn test_registry_prefers_override() {
        let (model, id, guid, slug) = model();
        let mut registry = ValueGeneratorRegistry::new();
        assert!(registry.select(model.property(id)).is_some());
        assert!(matches!(
            registry.select(model.property(guid)).unwrap().next(model.property(guid)),
            Ok(Value::Uuid(_))
        ));
        assert!(matches!(
            registry.select(model.property(slug)).unwrap().next(model.property(slug)),
            Ok(Value::Text(_))
        ));

        assert!(!registry.has_generator(id));
        registry.set_generator(id, Arc::new(UuidV7Generator));
        assert!(registry.has_generator(id));
        let err = registry
            .select(model.property(id))
            .unwrap()
            .next(model.property(id))
            .unwrap_err();
        assert!(matches!(err, TrackerError::ValueGeneration { .. }));
    }

    #[tokio::test]
    async fn test_next_async_observes_cancellation() {
        let (model, id, ..) = model();
        let generator = TemporaryIntGenerator::new();
        let token = CancellationToken::new();
        assert!(generator.next_async(model.property(id), &token).await.is_ok());

        token.cancel();
        let err = generator
            .next_async(model.property(id), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Cancelled { .. }));
    }
}
