#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{blog_model, new_tracker, unchanged_blog};
use entrack_core::errors::{ExError, ExErrorKind, TrackerError};
use entrack_core::{DeleteBehavior, EntityState, InstanceId, Value};
use entrack_core_types::{RequestContext, RequestId, TraceId};

#[test]
fn test_identity_conflict_verifiable_by_kind() {
    let err = TrackerError::IdentityConflict {
        entity_type: "Blog".to_string(),
        key: "***REDACTED***".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::IdentityConflict);
    assert_eq!(ex_err.code(), "ERR_IDENTITY_CONFLICT");
    assert_eq!(ex_err.entity_type(), Some("Blog"));
    assert!(!ex_err.message().contains("{1}"));
}

#[test]
fn test_lookup_failures_share_not_found() {
    let errors = [
        TrackerError::UnknownInstance {
            instance: "#4".to_string(),
        },
        TrackerError::UnknownEntityType {
            entity_type: "Ghost".to_string(),
        },
        TrackerError::UnknownMember {
            entity_type: "Blog".to_string(),
            member: "Owner".to_string(),
        },
    ];

    for err in errors {
        let ex_err: ExError = err.into();
        assert_eq!(ex_err.kind(), ExErrorKind::NotFound);
        assert_eq!(ex_err.code(), "ERR_NOT_FOUND");
    }
}

#[test]
fn test_unknown_member_keeps_context() {
    let err = TrackerError::UnknownMember {
        entity_type: "Blog".to_string(),
        member: "Owner".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.entity_type(), Some("Blog"));
    assert_eq!(ex_err.member(), Some("Owner"));
}

#[test]
fn test_conceptual_null_kinds_are_distinct() {
    let relationship: ExError = TrackerError::RelationshipConceptualNull {
        principal_type: "Blog".to_string(),
        dependent_type: "Post".to_string(),
        detail: String::new(),
    }
    .into();
    let property: ExError = TrackerError::PropertyConceptualNull {
        entity_type: "Post".to_string(),
        property: "Title".to_string(),
    }
    .into();

    assert_eq!(relationship.code(), "ERR_RELATIONSHIP_CONCEPTUAL_NULL");
    assert_eq!(relationship.entity_type(), Some("Post"));
    assert_eq!(property.code(), "ERR_PROPERTY_CONCEPTUAL_NULL");
    assert_eq!(property.member(), Some("Title"));
    assert_ne!(relationship.kind(), property.kind());
}

#[test]
fn test_integration_failures_map_to_their_kinds() {
    let cases = [
        (
            TrackerError::Cancelled {
                op: "save_changes_async".to_string(),
            },
            ExErrorKind::Cancelled,
            "ERR_CANCELLED",
        ),
        (
            TrackerError::Store {
                message: "deadlock".to_string(),
            },
            ExErrorKind::Persistence,
            "ERR_PERSISTENCE",
        ),
        (
            TrackerError::Config {
                message: "bad toml".to_string(),
            },
            ExErrorKind::Config,
            "ERR_CONFIG",
        ),
        (
            TrackerError::InvalidModel {
                reason: "no key".to_string(),
            },
            ExErrorKind::InvalidModel,
            "ERR_INVALID_MODEL",
        ),
    ];

    for (err, kind, code) in cases {
        let ex_err: ExError = err.into();
        assert_eq!(ex_err.kind(), kind);
        assert_eq!(ex_err.code(), code);
    }
}

#[test]
fn test_cancelled_records_operation() {
    let ex_err: ExError = TrackerError::Cancelled {
        op: "attach_graph_async".to_string(),
    }
    .into();
    assert_eq!(ex_err.op(), Some("attach_graph_async"));
}

#[test]
fn test_correlation_ids_attach_to_structured_error() {
    let request_id = RequestId::from_string("req-1".to_string());
    let trace_id = TraceId::from_string("trace-1".to_string());

    let ex_err = ExError::from(TrackerError::Store {
        message: "timeout".to_string(),
    })
    .with_request_id(request_id.clone())
    .with_trace_id(trace_id.clone());

    assert_eq!(ex_err.request_id(), Some(&request_id));
    assert_eq!(ex_err.trace_id(), Some(&trace_id));
}

#[test]
fn test_request_context_fills_correlation_ids() {
    let untraced = RequestContext::with_request_id(RequestId::from_string("req-2".to_string()));
    let ex_err = ExError::from(TrackerError::Store {
        message: "timeout".to_string(),
    })
    .with_context(&untraced);
    assert_eq!(ex_err.request_id().map(RequestId::as_str), Some("req-2"));
    assert_eq!(ex_err.trace_id(), None);

    let traced = untraced.with_trace_id(TraceId::from_string("trace-2".to_string()));
    let ex_err = ExError::new(ExErrorKind::Persistence).with_context(&traced);
    assert_eq!(ex_err.trace_id().map(TraceId::as_str), Some("trace-2"));
}

#[test]
fn test_error_kind_code_mapping() {
    // Each kind has a stable, unique code
    let kinds = [
        (ExErrorKind::IdentityConflict, "ERR_IDENTITY_CONFLICT"),
        (ExErrorKind::InvalidKeyValue, "ERR_INVALID_KEY_VALUE"),
        (ExErrorKind::KeyTypeMismatch, "ERR_KEY_TYPE_MISMATCH"),
        (ExErrorKind::ReadOnlyBeforeSave, "ERR_READ_ONLY_BEFORE_SAVE"),
        (ExErrorKind::ReadOnlyAfterSave, "ERR_READ_ONLY_AFTER_SAVE"),
        (ExErrorKind::KeyReadOnly, "ERR_KEY_READ_ONLY"),
        (ExErrorKind::TempValuePersists, "ERR_TEMP_VALUE_PERSISTS"),
        (ExErrorKind::ValueGeneration, "ERR_VALUE_GENERATION"),
        (ExErrorKind::NotFound, "ERR_NOT_FOUND"),
        (ExErrorKind::Internal, "ERR_INTERNAL"),
    ];
    let mut codes: Vec<&str> = kinds.iter().map(|(kind, _)| kind.code()).collect();
    for (kind, expected_code) in kinds {
        assert_eq!(kind.code(), expected_code);
    }
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), kinds.len());
}

#[test]
fn test_operations_surface_typed_errors() {
    // GIVEN a tracker with one blog
    let m = blog_model(DeleteBehavior::ClientSetNull, false);
    let mut sm = new_tracker(&m.model);
    let blog = unchanged_blog(&mut sm, &m, 1);

    // WHEN touching a handle this tracker never handed out
    let mut other = new_tracker(&m.model);
    let foreign: Vec<InstanceId> = (0..4).map(|_| other.create_instance(m.blog).unwrap()).collect();
    let err = sm
        .set_entity_state(foreign[3], EntityState::Unchanged)
        .unwrap_err();

    // THEN the failure is a lookup error
    assert_eq!(ExError::from(err).kind(), ExErrorKind::NotFound);

    // WHEN editing a saved key through the entry
    let err = sm.set_property(blog, m.blog_id, Value::Int(2)).unwrap_err();

    // THEN it carries the shape and property
    let ex_err = ExError::from(err);
    assert_eq!(ex_err.kind(), ExErrorKind::KeyReadOnly);
    assert_eq!(ex_err.entity_type(), Some("Blog"));
    assert_eq!(ex_err.member(), Some("Id"));
}
