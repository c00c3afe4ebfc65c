#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeSet;

use common::{blog_model, new_tracker, order_model, track, unchanged_blog, unchanged_post};
use entrack_core::{DeleteBehavior, EntityState, InstanceId, KeyValue, TrackerError, TrackerOptions, Value};
use proptest::prelude::*;

#[test]
fn test_tracking_same_instance_twice_is_a_no_op() {
    // GIVEN a tracked blog
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = unchanged_blog(&mut sm, &m, 1);

    // WHEN the same instance is put in the same state again
    sm.set_entity_state(blog, EntityState::Unchanged).unwrap();

    // THEN it is still the one entry under its key
    assert_eq!(sm.try_get_entry(m.blog_pk, vec![Value::Int(1)]), Some(blog));
    assert_eq!(sm.entries(), vec![blog]);
}

#[test]
fn test_composite_key_lookup_uses_content_equality() {
    // GIVEN an order tracked under {1, 'A'}
    let m = order_model();
    let mut sm = new_tracker(&m.model);
    let order = track(
        &mut sm,
        m.order,
        &[
            (m.order_number, Value::Int(1)),
            (m.order_region, Value::Text("A".to_string())),
        ],
        EntityState::Unchanged,
    );

    // WHEN it is looked up with a freshly built key
    let region = String::from("A");
    let found = sm.try_get_entry(m.order_pk, vec![Value::Int(1), Value::Text(region)]);

    // THEN the same entry is returned, and a different key finds nothing
    assert_eq!(found, Some(order));
    assert_eq!(
        sm.try_get_entry(m.order_pk, vec![Value::Int(1), Value::from("B")]),
        None
    );
}

#[test]
fn test_null_key_component_is_invalid() {
    // GIVEN an order whose region is missing
    let m = order_model();
    let mut sm = new_tracker(&m.model);
    let order = sm.create_instance(m.order).unwrap();
    sm.write_property(order, m.order_number, 1).unwrap();
    sm.write_property(order, m.order_region, Value::Null).unwrap();

    // WHEN it is tracked
    let err = sm.set_entity_state(order, EntityState::Unchanged).unwrap_err();

    // THEN the null key is rejected and nothing is indexed
    assert!(matches!(
        err,
        TrackerError::InvalidKeyValue { ref entity_type, .. } if entity_type == "Order"
    ));
    assert!(sm.entries().is_empty());
}

#[test]
fn test_null_key_is_skipped_when_allowed() {
    // GIVEN a context that tolerates null keys
    let m = order_model();
    let options = TrackerOptions::default().with_allow_null_keys(true);
    let mut sm = common::new_tracker_with(&m.model, options);
    let order = sm.create_instance(m.order).unwrap();
    sm.write_property(order, m.order_region, Value::Null).unwrap();

    // WHEN it is tracked
    sm.set_entity_state(order, EntityState::Unchanged).unwrap();

    // THEN it is tracked without being findable by key
    assert_eq!(sm.state(order), EntityState::Unchanged);
    assert_eq!(sm.try_get_entry(m.order_pk, vec![Value::Int(0), Value::Null]), None);
}

#[test]
fn test_flag_set_matches_property_count() {
    // GIVEN entries of two shapes
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = unchanged_blog(&mut sm, &m, 1);
    let post = unchanged_post(&mut sm, &m, 10, Some(1));

    // WHEN they are modified
    sm.set_entity_state(blog, EntityState::Modified).unwrap();
    sm.set_property(post, m.post_title, "t").unwrap();

    // THEN each flag set still has one slot per property of the shape
    for (id, ty) in [(blog, m.blog), (post, m.post)] {
        let expected = m.model.entity_type(ty).properties().len();
        assert_eq!(sm.entry(id).unwrap().flags().len(), expected);
    }
}

#[test]
fn test_key_edit_on_added_entry_reindexes() {
    // GIVEN an added blog with key 5
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = track(&mut sm, m.blog, &[(m.blog_id, Value::Int(5))], EntityState::Added);

    // WHEN its key is changed
    sm.set_property(blog, m.blog_id, 6).unwrap();

    // THEN only the new key finds it
    assert_eq!(sm.try_get_entry(m.blog_pk, vec![Value::Int(6)]), Some(blog));
    assert_eq!(sm.try_get_entry(m.blog_pk, vec![Value::Int(5)]), None);
}

fn key_component() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        (0i64..4).prop_map(Value::Int),
        "[ab]{1,2}".prop_map(Value::Text),
        proptest::collection::vec(0u8..3, 0..3).prop_map(Value::Binary),
    ]
}

proptest! {
    #[test]
    fn prop_key_construction_fails_iff_a_component_is_null(
        values in proptest::collection::vec(key_component(), 1..4)
    ) {
        let has_null = values.iter().any(Value::is_null);
        prop_assert_eq!(KeyValue::try_from_values(values).is_none(), has_null);
    }

    #[test]
    fn prop_composite_equality_is_by_content(
        values in proptest::collection::vec(key_component(), 2..4)
    ) {
        prop_assume!(values.iter().all(|v| !v.is_null()));
        let a = KeyValue::try_from_values(values.clone()).unwrap();
        let b = KeyValue::try_from_values(values.iter().cloned().collect()).unwrap();
        prop_assert_eq!(&a, &a);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&b, &a);
    }

    #[test]
    fn prop_dependents_match_live_foreign_keys(
        edits in proptest::collection::vec((0usize..5, proptest::option::of(1i64..4)), 0..24)
    ) {
        let m = blog_model(DeleteBehavior::ClientSetNull, false);
        let mut sm = new_tracker(&m.model);
        let fk = m.model.entity_type(m.post).foreign_keys()[0];
        let blogs: Vec<InstanceId> = (1..4).map(|id| unchanged_blog(&mut sm, &m, id)).collect();
        let posts: Vec<InstanceId> = (0..5).map(|i| unchanged_post(&mut sm, &m, 100 + i, None)).collect();

        for (index, blog_id) in edits {
            sm.set_property(posts[index], m.post_blog_id, Value::from(blog_id)).unwrap();
        }

        for (offset, blog) in blogs.iter().enumerate() {
            let key = Value::Int(offset as i64 + 1);
            let expected: BTreeSet<InstanceId> = posts
                .iter()
                .copied()
                .filter(|p| sm.table().current_value(*p, m.post_blog_id) == key)
                .collect();
            let indexed: BTreeSet<InstanceId> = sm.dependents(*blog, fk).unwrap().into_iter().collect();
            let navigated: BTreeSet<InstanceId> = sm.table().collection(*blog, m.posts).iter().copied().collect();
            prop_assert_eq!(&indexed, &expected);
            prop_assert_eq!(&navigated, &expected);
            for post in &expected {
                prop_assert_eq!(sm.table().reference(*post, m.post_blog), Some(*blog));
            }
        }
    }
}
