#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{blog_model, new_tracker, track};
use entrack_core::model::Property;
use entrack_core::{
    DeleteBehavior, EntityState, ModelBuilder, TrackerError, Value, ValueGenerated, ValueGenerator,
    ValueKind,
};
use tokio_util::sync::CancellationToken;

/// Hands out "name-1", "name-2", ... as permanent values
#[derive(Default)]
struct Sequence {
    calls: AtomicUsize,
}

#[async_trait]
impl ValueGenerator for Sequence {
    fn next(&self, _property: &Property) -> entrack_core::Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Value::Text(format!("name-{n}")))
    }

    fn generates_temporary_values(&self) -> bool {
        false
    }
}

/// Cancels its own token while producing a value, as a shutdown racing a
/// round trip to a key service would
struct CancelsMidway {
    token: CancellationToken,
}

#[async_trait]
impl ValueGenerator for CancelsMidway {
    fn next(&self, _property: &Property) -> entrack_core::Result<Value> {
        Ok(Value::Int(42))
    }

    async fn next_async(
        &self,
        property: &Property,
        _cancellation: &CancellationToken,
    ) -> entrack_core::Result<Value> {
        tokio::task::yield_now().await;
        self.token.cancel();
        self.next(property)
    }

    fn generates_temporary_values(&self) -> bool {
        false
    }
}

#[test]
fn test_temporary_keys_are_distinct() {
    // GIVEN three new blogs
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blogs: Vec<_> = (0..3).map(|_| sm.create_instance(m.blog).unwrap()).collect();

    // WHEN they are added
    for blog in &blogs {
        sm.set_entity_state(*blog, EntityState::Added).unwrap();
    }

    // THEN each holds its own temporary key and all are findable
    let keys: Vec<Value> = blogs
        .iter()
        .map(|b| sm.table().current_value(*b, m.blog_id))
        .collect();
    assert_ne!(keys[0], keys[1]);
    assert_ne!(keys[1], keys[2]);
    assert_ne!(keys[0], keys[2]);
    for (blog, key) in blogs.iter().zip(keys) {
        assert_eq!(sm.try_get_entry(m.blog_pk, vec![key]), Some(*blog));
    }
}

#[test]
fn test_registered_generator_fills_non_key_property() {
    // GIVEN a generator registered for Blog.Name
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let sequence = Arc::new(Sequence::default());
    sm.generators_mut().set_generator(m.blog_name, sequence);

    // WHEN a nameless and a named blog are added
    let nameless = sm.create_instance(m.blog).unwrap();
    sm.set_entity_state(nameless, EntityState::Added).unwrap();
    let named = track(
        &mut sm,
        m.blog,
        &[(m.blog_name, Value::from("mine"))],
        EntityState::Added,
    );

    // THEN only the default one was generated, permanently
    assert_eq!(sm.table().current_value(nameless, m.blog_name), Value::from("name-1"));
    assert!(!sm.table().has_temporary_value(nameless, m.blog_name));
    assert_eq!(sm.table().current_value(named, m.blog_name), Value::from("mine"));
}

#[test]
fn test_uuid_key_is_permanent() {
    // GIVEN a shape keyed by a generated UUID
    let mut b = ModelBuilder::new();
    let doc = b.entity("Doc");
    let id = b
        .property(doc, "Id", ValueKind::Uuid)
        .value_generated(ValueGenerated::OnAdd)
        .build();
    b.primary_key(doc, &[id]);
    let model = Arc::new(b.finish().unwrap());
    let mut sm = new_tracker(&model);

    // WHEN an instance is added
    let d = sm.create_instance(doc).unwrap();
    sm.set_entity_state(d, EntityState::Added).unwrap();

    // THEN its key is a real UUID that needs no store round trip
    let entry = sm.update_entry(d).unwrap();
    assert!(matches!(entry.current_value(id), Value::Uuid(_)));
    assert!(!entry.has_temporary_value(id));
    assert!(entry.is_key_set());
}

#[test]
fn test_missing_generator_names_the_shape() {
    // GIVEN a generated key of a kind nothing can produce
    let mut b = ModelBuilder::new();
    let flag = b.entity("Flag");
    let id = b
        .property(flag, "Id", ValueKind::Bool)
        .value_generated(ValueGenerated::OnAdd)
        .build();
    b.primary_key(flag, &[id]);
    let model = Arc::new(b.finish().unwrap());
    let mut sm = new_tracker(&model);
    let f = sm.create_instance(flag).unwrap();

    // WHEN it is added
    let err = sm.set_entity_state(f, EntityState::Added).unwrap_err();

    // THEN the failure names the shape and property and nothing is tracked
    match err {
        TrackerError::ValueGeneration {
            entity_type,
            property,
            ..
        } => {
            assert_eq!(entity_type, "Flag");
            assert_eq!(property, "Id");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(sm.state(f), EntityState::Detached);
}

#[test]
fn test_foreign_key_copies_principal_key_instead_of_generating() {
    // GIVEN a tracked blog with key 5
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = track(&mut sm, m.blog, &[(m.blog_id, Value::Int(5))], EntityState::Unchanged);

    // WHEN a post navigating to it is added
    let post = sm.create_instance(m.post).unwrap();
    sm.write_reference(post, m.post_blog, Some(blog)).unwrap();
    sm.set_entity_state(post, EntityState::Added).unwrap();

    // THEN the foreign key is the blog's real key
    assert_eq!(sm.table().current_value(post, m.post_blog_id), Value::Int(5));
    assert!(!sm.table().has_temporary_value(post, m.post_blog_id));
    assert!(sm.table().has_temporary_value(post, m.post_id));
}

#[tokio::test]
async fn test_async_add_generates_values() {
    // GIVEN a new blog
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = sm.create_instance(m.blog).unwrap();
    let token = CancellationToken::new();

    // WHEN it is added asynchronously
    sm.set_entity_state_async(blog, EntityState::Added, &token)
        .await
        .unwrap();

    // THEN it looks exactly like a synchronous add
    assert_eq!(sm.state(blog), EntityState::Added);
    assert!(sm.table().has_temporary_value(blog, m.blog_id));
}

#[tokio::test]
async fn test_async_add_observes_prior_cancellation() {
    // GIVEN a cancelled token
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = sm.create_instance(m.blog).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    // WHEN an add is attempted
    let err = sm
        .set_entity_state_async(blog, EntityState::Added, &token)
        .await
        .unwrap_err();

    // THEN nothing happened
    assert!(matches!(err, TrackerError::Cancelled { .. }));
    assert_eq!(sm.state(blog), EntityState::Detached);
    assert_eq!(sm.table().current_value(blog, m.blog_id), Value::Int(0));
}

#[tokio::test]
async fn test_cancellation_during_generation_leaves_entry_untouched() {
    // GIVEN a key generator that sees the token cancelled while it works
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let token = CancellationToken::new();
    sm.generators_mut().set_generator(
        m.blog_id,
        Arc::new(CancelsMidway {
            token: token.clone(),
        }),
    );
    let blog = sm.create_instance(m.blog).unwrap();

    // WHEN the blog is added asynchronously
    let err = sm
        .set_entity_state_async(blog, EntityState::Added, &token)
        .await
        .unwrap_err();

    // THEN the generated value was discarded with the transition
    assert!(matches!(err, TrackerError::Cancelled { .. }));
    assert_eq!(sm.state(blog), EntityState::Detached);
    assert_eq!(sm.table().current_value(blog, m.blog_id), Value::Int(0));
    assert_eq!(sm.try_get_entry(m.blog_pk, vec![Value::Int(42)]), None);
}
