#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{blog_model, new_tracker, unchanged_blog, BlogModel};
use entrack_core::{DeleteBehavior, EntityState, InstanceId, StateManager, TrackerError, Value};
use tokio_util::sync::CancellationToken;

/// Detached blog 1 holding a saved post 10 and a new post without a key
fn detached_graph(sm: &mut StateManager, m: &BlogModel) -> (InstanceId, InstanceId, InstanceId) {
    let blog = sm.create_instance(m.blog).unwrap();
    sm.write_property(blog, m.blog_id, 1).unwrap();
    let saved = sm.create_instance(m.post).unwrap();
    sm.write_property(saved, m.post_id, 10).unwrap();
    sm.write_property(saved, m.post_blog_id, 1).unwrap();
    let fresh = sm.create_instance(m.post).unwrap();
    sm.write_collection_add(blog, m.posts, saved).unwrap();
    sm.write_collection_add(blog, m.posts, fresh).unwrap();
    (blog, saved, fresh)
}

#[test]
fn test_attach_paints_graph_and_adds_keyless_nodes() {
    // GIVEN a detached graph
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let (blog, saved, fresh) = detached_graph(&mut sm, &m);

    // WHEN it is attached as Unchanged
    let attached = sm.attach_graph(blog, EntityState::Unchanged).unwrap();

    // THEN keyed nodes are Unchanged and the keyless post is Added
    assert_eq!(attached, 3);
    assert_eq!(sm.state(blog), EntityState::Unchanged);
    assert_eq!(sm.state(saved), EntityState::Unchanged);
    assert_eq!(sm.state(fresh), EntityState::Added);

    // AND the new post belongs to the blog
    assert_eq!(sm.table().current_value(fresh, m.post_blog_id), Value::Int(1));
    assert_eq!(sm.table().reference(fresh, m.post_blog), Some(blog));
    assert_eq!(sm.table().reference(saved, m.post_blog), Some(blog));
    assert_eq!(sm.table().collection(blog, m.posts), &[saved, fresh]);
}

#[test]
fn test_attach_stops_at_tracked_instances() {
    // GIVEN a tracked blog and a detached post pointing at it
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = unchanged_blog(&mut sm, &m, 1);
    let post = sm.create_instance(m.post).unwrap();
    sm.write_property(post, m.post_id, 10).unwrap();
    sm.write_reference(post, m.post_blog, Some(blog)).unwrap();

    // WHEN the post is attached as Modified
    let attached = sm.attach_graph(post, EntityState::Modified).unwrap();

    // THEN only the post is painted, and it joins the blog
    assert_eq!(attached, 1);
    assert_eq!(sm.state(blog), EntityState::Unchanged);
    assert_eq!(sm.state(post), EntityState::Modified);
    assert_eq!(sm.table().current_value(post, m.post_blog_id), Value::Int(1));
    assert_eq!(sm.table().collection(blog, m.posts), &[post]);
}

#[test]
fn test_attach_visits_cycles_once() {
    // GIVEN a blog and post referencing each other from both sides
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = sm.create_instance(m.blog).unwrap();
    sm.write_property(blog, m.blog_id, 1).unwrap();
    let post = sm.create_instance(m.post).unwrap();
    sm.write_property(post, m.post_id, 10).unwrap();
    sm.write_property(post, m.post_blog_id, 1).unwrap();
    sm.write_collection_add(blog, m.posts, post).unwrap();
    sm.write_reference(post, m.post_blog, Some(blog)).unwrap();

    // WHEN the post is attached
    let attached = sm.attach_graph(post, EntityState::Unchanged).unwrap();

    // THEN each instance is tracked once
    assert_eq!(attached, 2);
    assert_eq!(sm.table().collection(blog, m.posts), &[post]);
    assert_eq!(sm.changed_count(), 0);
}

#[tokio::test]
async fn test_async_attach_matches_sync_attach() {
    // GIVEN a detached graph
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let (blog, saved, fresh) = detached_graph(&mut sm, &m);

    // WHEN it is attached asynchronously
    let token = CancellationToken::new();
    let attached = sm
        .attach_graph_async(blog, EntityState::Unchanged, &token)
        .await
        .unwrap();

    // THEN the outcome is the same as attaching synchronously
    assert_eq!(attached, 3);
    assert_eq!(sm.state(saved), EntityState::Unchanged);
    assert_eq!(sm.state(fresh), EntityState::Added);
    assert_eq!(sm.table().reference(fresh, m.post_blog), Some(blog));
}

#[tokio::test]
async fn test_cancelled_async_attach_tracks_nothing() {
    // GIVEN a detached graph and a cancelled token
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let (blog, ..) = detached_graph(&mut sm, &m);
    let token = CancellationToken::new();
    token.cancel();

    // WHEN attaching
    let err = sm
        .attach_graph_async(blog, EntityState::Unchanged, &token)
        .await
        .unwrap_err();

    // THEN the walk never started
    assert!(matches!(err, TrackerError::Cancelled { .. }));
    assert!(sm.entries().is_empty());
}
