#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{blog_model, new_tracker, track, unchanged_blog, unchanged_post};
use entrack_core::{
    ChangeTrackingStrategy, DeleteBehavior, EntityState, ModelBuilder, TrackerError, Value, ValueKind,
};

#[test]
fn test_raw_writes_wait_for_the_sweep() {
    // GIVEN an unchanged blog tracked by snapshot
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = track(
        &mut sm,
        m.blog,
        &[(m.blog_id, Value::Int(1)), (m.blog_name, Value::from("a"))],
        EntityState::Unchanged,
    );

    // WHEN application code renames it
    sm.write_property(blog, m.blog_name, "b").unwrap();
    assert_eq!(sm.state(blog), EntityState::Unchanged);

    // THEN the sweep finds the edit
    sm.detect_changes().unwrap();
    assert_eq!(sm.state(blog), EntityState::Modified);
    assert_eq!(sm.update_entry(blog).unwrap().modified_properties(), vec![m.blog_name]);
    assert_eq!(sm.table().original_value(blog, m.blog_name), Value::from("a"));
}

#[test]
fn test_write_reverted_before_sweep_is_invisible() {
    // GIVEN an unchanged blog
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = track(
        &mut sm,
        m.blog,
        &[(m.blog_id, Value::Int(1)), (m.blog_name, Value::from("a"))],
        EntityState::Unchanged,
    );

    // WHEN a write is undone before detection
    sm.write_property(blog, m.blog_name, "b").unwrap();
    sm.write_property(blog, m.blog_name, "a").unwrap();
    sm.detect_changes().unwrap();

    // THEN nothing changed
    assert_eq!(sm.state(blog), EntityState::Unchanged);
    assert_eq!(sm.changed_count(), 0);
}

#[test]
fn test_raw_foreign_key_write_is_fixed_up_by_the_sweep() {
    // GIVEN a post of blog 1
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let one = unchanged_blog(&mut sm, &m, 1);
    let two = unchanged_blog(&mut sm, &m, 2);
    let post = unchanged_post(&mut sm, &m, 10, Some(1));

    // WHEN its foreign key field is overwritten and changes are detected
    sm.write_property(post, m.post_blog_id, 2).unwrap();
    sm.detect_changes().unwrap();

    // THEN navigations and the dependents index follow
    assert_eq!(sm.table().reference(post, m.post_blog), Some(two));
    assert!(sm.table().collection(one, m.posts).is_empty());
    assert_eq!(sm.table().collection(two, m.posts), &[post]);
    let fk = m.model.entity_type(m.post).foreign_keys()[0];
    assert_eq!(sm.dependents(two, fk).unwrap(), vec![post]);
    assert!(sm.dependents(one, fk).unwrap().is_empty());
}

#[test]
fn test_raw_reference_write_is_fixed_up_by_the_sweep() {
    // GIVEN a post of blog 1
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    unchanged_blog(&mut sm, &m, 1);
    let two = unchanged_blog(&mut sm, &m, 2);
    let post = unchanged_post(&mut sm, &m, 10, Some(1));

    // WHEN its navigation field is reassigned and changes are detected
    sm.write_reference(post, m.post_blog, Some(two)).unwrap();
    assert_eq!(sm.table().current_value(post, m.post_blog_id), Value::Int(1));
    sm.detect_changes().unwrap();

    // THEN the foreign key follows the navigation
    assert_eq!(sm.table().current_value(post, m.post_blog_id), Value::Int(2));
    assert_eq!(sm.table().collection(two, m.posts), &[post]);
    assert_eq!(sm.state(post), EntityState::Modified);
}

#[test]
fn test_collection_diff_is_found_by_the_sweep() {
    // GIVEN two blogs and a post of blog 1
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let one = unchanged_blog(&mut sm, &m, 1);
    let two = unchanged_blog(&mut sm, &m, 2);
    let post = unchanged_post(&mut sm, &m, 10, Some(1));

    // WHEN application code moves it between collections
    sm.write_collection_remove(one, m.posts, post).unwrap();
    sm.write_collection_add(two, m.posts, post).unwrap();
    sm.detect_changes().unwrap();

    // THEN the post is re-parented
    assert_eq!(sm.table().current_value(post, m.post_blog_id), Value::Int(2));
    assert_eq!(sm.table().reference(post, m.post_blog), Some(two));
    assert!(sm.table().collection(one, m.posts).is_empty());
}

#[test]
fn test_saved_key_edit_is_rejected_by_the_sweep() {
    // GIVEN an unchanged blog
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = unchanged_blog(&mut sm, &m, 1);

    // WHEN its key field is overwritten
    sm.write_property(blog, m.blog_id, 2).unwrap();
    let err = sm.detect_changes().unwrap_err();

    // THEN the edit is refused
    assert_eq!(
        err,
        TrackerError::KeyReadOnly {
            entity_type: "Blog".to_string(),
            property: "Id".to_string(),
        }
    );
}

#[test]
fn test_original_value_override_marks_difference() {
    // GIVEN an unchanged blog named "a"
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = track(
        &mut sm,
        m.blog,
        &[(m.blog_id, Value::Int(1)), (m.blog_name, Value::from("a"))],
        EntityState::Unchanged,
    );

    // WHEN its original name is overwritten
    sm.set_original_value(blog, m.blog_name, "z").unwrap();

    // THEN the entry is modified against the new original
    assert_eq!(sm.state(blog), EntityState::Modified);
    assert!(sm.table().is_modified(blog, m.blog_name));
    assert_eq!(sm.table().original_value(blog, m.blog_name), Value::from("z"));
    assert_eq!(sm.table().current_value(blog, m.blog_name), Value::from("a"));
}

#[test]
fn test_notifying_shape_reports_writes_at_once() {
    // GIVEN a shape whose instances report their own changes
    let mut b = ModelBuilder::new();
    let tag = b.entity_with_strategy("Tag", ChangeTrackingStrategy::ChangedNotifications);
    let id = b.property(tag, "Id", ValueKind::Int).build();
    let label = b.property(tag, "Label", ValueKind::Text).nullable().build();
    b.primary_key(tag, &[id]);
    let model = Arc::new(b.finish().unwrap());
    let mut sm = new_tracker(&model);
    let t = track(
        &mut sm,
        tag,
        &[(id, Value::Int(1)), (label, Value::from("a"))],
        EntityState::Unchanged,
    );

    // WHEN application code writes a member
    sm.write_property(t, label, "b").unwrap();

    // THEN the entry is modified without a sweep
    assert_eq!(sm.state(t), EntityState::Modified);
    assert_eq!(sm.table().original_value(t, label), Value::from("a"));
}

#[test]
fn test_lazily_snapshotted_shape_captures_original_on_first_write() {
    // GIVEN a shape that reports changes before and after they happen
    let mut b = ModelBuilder::new();
    let tag = b.entity_with_strategy("Tag", ChangeTrackingStrategy::ChangingAndChangedNotifications);
    let id = b.property(tag, "Id", ValueKind::Int).build();
    let label = b.property(tag, "Label", ValueKind::Text).nullable().build();
    b.primary_key(tag, &[id]);
    let model = Arc::new(b.finish().unwrap());
    let mut sm = new_tracker(&model);
    let t = track(
        &mut sm,
        tag,
        &[(id, Value::Int(1)), (label, Value::from("a"))],
        EntityState::Unchanged,
    );

    // WHEN it is written twice
    sm.write_property(t, label, "b").unwrap();
    sm.write_property(t, label, "c").unwrap();

    // THEN the original is the value before the first write
    assert_eq!(sm.state(t), EntityState::Modified);
    assert_eq!(sm.table().original_value(t, label), Value::from("a"));
    assert_eq!(sm.table().current_value(t, label), Value::from("c"));
}

#[test]
fn test_sweep_spans_chained_snapshot_blocks() {
    // GIVEN a shape wide enough for its original values to span two blocks
    let mut b = ModelBuilder::new();
    let wide = b.entity("Wide");
    let id = b.property(wide, "Id", ValueKind::Int).build();
    let columns: Vec<_> = (0..40)
        .map(|i| b.property(wide, format!("C{i}"), ValueKind::Int).build())
        .collect();
    b.primary_key(wide, &[id]);
    let model = Arc::new(b.finish().unwrap());
    let mut sm = new_tracker(&model);
    let values: Vec<_> = std::iter::once((id, Value::Int(1)))
        .chain(columns.iter().enumerate().map(|(i, c)| (*c, Value::Int(i as i64))))
        .collect();
    let w = track(&mut sm, wide, &values, EntityState::Unchanged);

    // WHEN columns on either side of the block boundary are edited
    sm.write_property(w, columns[3], Value::Int(-3)).unwrap();
    sm.write_property(w, columns[35], Value::Int(-35)).unwrap();
    sm.detect_changes().unwrap();

    // THEN only those are modified and both originals survive
    assert_eq!(sm.state(w), EntityState::Modified);
    assert_eq!(
        sm.update_entry(w).unwrap().modified_properties(),
        vec![columns[3], columns[35]]
    );
    assert_eq!(sm.table().original_value(w, columns[3]), Value::Int(3));
    assert_eq!(sm.table().original_value(w, columns[35]), Value::Int(35));
    assert_eq!(sm.table().current_value(w, columns[35]), Value::Int(-35));
    assert_eq!(sm.table().original_value(w, columns[39]), Value::Int(39));
}
