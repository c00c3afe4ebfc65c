use entrack_core_types::{RequestContext, RequestId, TraceId};
use thiserror::Error;

/// Result type alias using TrackerError
pub type Result<T> = std::result::Result<T, TrackerError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure the tracker reports maps to one kind, and every kind maps to
/// a stable code that callers and tests can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Identity
    IdentityConflict,
    InvalidKeyValue,
    KeyTypeMismatch,

    // Property rules
    ReadOnlyBeforeSave,
    ReadOnlyAfterSave,
    KeyReadOnly,
    TempValuePersists,

    // Required relationships
    RelationshipConceptualNull,
    PropertyConceptualNull,

    // Model / capability
    InvalidModel,
    MissingNotificationInterface,
    NotFound,

    // Integration
    ValueGeneration,
    Cancelled,
    Persistence,
    Config,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::IdentityConflict => "ERR_IDENTITY_CONFLICT",
            ExErrorKind::InvalidKeyValue => "ERR_INVALID_KEY_VALUE",
            ExErrorKind::KeyTypeMismatch => "ERR_KEY_TYPE_MISMATCH",
            ExErrorKind::ReadOnlyBeforeSave => "ERR_READ_ONLY_BEFORE_SAVE",
            ExErrorKind::ReadOnlyAfterSave => "ERR_READ_ONLY_AFTER_SAVE",
            ExErrorKind::KeyReadOnly => "ERR_KEY_READ_ONLY",
            ExErrorKind::TempValuePersists => "ERR_TEMP_VALUE_PERSISTS",
            ExErrorKind::RelationshipConceptualNull => "ERR_RELATIONSHIP_CONCEPTUAL_NULL",
            ExErrorKind::PropertyConceptualNull => "ERR_PROPERTY_CONCEPTUAL_NULL",
            ExErrorKind::InvalidModel => "ERR_INVALID_MODEL",
            ExErrorKind::MissingNotificationInterface => "ERR_MISSING_NOTIFICATION_INTERFACE",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::ValueGeneration => "ERR_VALUE_GENERATION",
            ExErrorKind::Cancelled => "ERR_CANCELLED",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Structured view of a [`TrackerError`] with classification fields for
/// programmatic handling and context for debugging.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_type: Option<String>,
    member: Option<String>,
    request_id: Option<RequestId>,
    trace_id: Option<TraceId>,
    message: String,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_type: None,
            member: None,
            request_id: None,
            trace_id: None,
            message: String::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity type context
    pub fn with_entity_type(mut self, name: impl Into<String>) -> Self {
        self.entity_type = Some(name.into());
        self
    }

    /// Add property or navigation context
    pub fn with_member(mut self, name: impl Into<String>) -> Self {
        self.member = Some(name.into());
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Attach the correlation of the request that failed
    pub fn with_context(self, context: &RequestContext) -> Self {
        let err = self.with_request_id(context.request_id.clone());
        match &context.trace_id {
            Some(trace_id) => err.with_trace_id(trace_id.clone()),
            None => err,
        }
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(entity_type) = &self.entity_type {
            write!(f, " (entity_type: {})", entity_type)?;
        }
        if let Some(member) = &self.member {
            write!(f, " (member: {})", member)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========

/// Every failure a tracking context can report
///
/// Key values inside messages are already rendered through `Sensitive`, so
/// they read `***REDACTED***` unless sensitive-data logging is enabled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    // ===== Identity =====
    /// Another instance with the same key value is already tracked
    #[error("The instance of entity type '{entity_type}' cannot be tracked because another instance with the key value {key} is already being tracked")]
    IdentityConflict { entity_type: String, key: String },

    #[error("Unable to track an entity of type '{entity_type}' because its key {properties} is null")]
    InvalidKeyValue {
        entity_type: String,
        properties: String,
    },

    /// A materialized row holds a key column of the wrong kind
    #[error("The key property '{property}' on entity type '{entity_type}' expects a value of kind {expected} but the row supplied {actual}")]
    KeyTypeMismatch {
        entity_type: String,
        property: String,
        expected: String,
        actual: String,
    },

    // ===== Property rules =====
    #[error("The property '{property}' on entity type '{entity_type}' is defined to be read-only before it is saved, but its value has been set to something other than a temporary or default value")]
    PropertyReadOnlyBeforeSave {
        entity_type: String,
        property: String,
    },

    #[error("The property '{property}' on entity type '{entity_type}' is defined to be read-only after it has been saved, but its value has been modified or marked as modified")]
    PropertyReadOnlyAfterSave {
        entity_type: String,
        property: String,
    },

    #[error("The property '{property}' on entity type '{entity_type}' is part of a key and so cannot be modified or marked as modified")]
    KeyReadOnly {
        entity_type: String,
        property: String,
    },

    #[error("The property '{property}' on entity type '{entity_type}' has a temporary value while attempting to change the entity's state to '{state}'")]
    TempValuePersists {
        entity_type: String,
        property: String,
        state: String,
    },

    // ===== Required relationships =====
    #[error("The association between entity types '{principal_type}' and '{dependent_type}' has been severed, but the relationship is required{detail}")]
    RelationshipConceptualNull {
        principal_type: String,
        dependent_type: String,
        detail: String,
    },

    #[error("The property '{property}' on entity type '{entity_type}' is marked as null, but this cannot be saved because the property is required")]
    PropertyConceptualNull {
        entity_type: String,
        property: String,
    },

    // ===== Model / capability =====
    #[error("Entity type '{entity_type}' uses the '{strategy}' change-tracking strategy but the instance does not provide change notifications")]
    MissingNotificationInterface {
        entity_type: String,
        strategy: String,
    },

    #[error("Invalid model: {reason}")]
    InvalidModel { reason: String },

    #[error("Instance not found: {instance}")]
    UnknownInstance { instance: String },

    #[error("Entity type not found: {entity_type}")]
    UnknownEntityType { entity_type: String },

    #[error("'{member}' is not a member of entity type '{entity_type}'")]
    UnknownMember { entity_type: String, member: String },

    // ===== Integration =====
    #[error("Value generation failed for property '{property}' on entity type '{entity_type}': {message}")]
    ValueGeneration {
        entity_type: String,
        property: String,
        message: String,
    },

    #[error("Operation cancelled: {op}")]
    Cancelled { op: String },

    /// The external store rejected or failed to apply a batch
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<TrackerError> for ExError {
    fn from(err: TrackerError) -> Self {
        let message = err.to_string();
        match err {
            TrackerError::IdentityConflict { entity_type, .. } => {
                ExError::new(ExErrorKind::IdentityConflict).with_entity_type(entity_type)
            }
            TrackerError::InvalidKeyValue {
                entity_type,
                properties,
            } => ExError::new(ExErrorKind::InvalidKeyValue)
                .with_entity_type(entity_type)
                .with_member(properties),
            TrackerError::KeyTypeMismatch {
                entity_type,
                property,
                ..
            } => ExError::new(ExErrorKind::KeyTypeMismatch)
                .with_entity_type(entity_type)
                .with_member(property),
            TrackerError::PropertyReadOnlyBeforeSave {
                entity_type,
                property,
            } => ExError::new(ExErrorKind::ReadOnlyBeforeSave)
                .with_entity_type(entity_type)
                .with_member(property),
            TrackerError::PropertyReadOnlyAfterSave {
                entity_type,
                property,
            } => ExError::new(ExErrorKind::ReadOnlyAfterSave)
                .with_entity_type(entity_type)
                .with_member(property),
            TrackerError::KeyReadOnly {
                entity_type,
                property,
            } => ExError::new(ExErrorKind::KeyReadOnly)
                .with_entity_type(entity_type)
                .with_member(property),
            TrackerError::TempValuePersists {
                entity_type,
                property,
                ..
            } => ExError::new(ExErrorKind::TempValuePersists)
                .with_entity_type(entity_type)
                .with_member(property),
            TrackerError::RelationshipConceptualNull { dependent_type, .. } => {
                ExError::new(ExErrorKind::RelationshipConceptualNull)
                    .with_entity_type(dependent_type)
            }
            TrackerError::PropertyConceptualNull {
                entity_type,
                property,
            } => ExError::new(ExErrorKind::PropertyConceptualNull)
                .with_entity_type(entity_type)
                .with_member(property),
            TrackerError::MissingNotificationInterface { entity_type, .. } => {
                ExError::new(ExErrorKind::MissingNotificationInterface)
                    .with_entity_type(entity_type)
            }
            TrackerError::InvalidModel { .. } => ExError::new(ExErrorKind::InvalidModel),
            TrackerError::UnknownInstance { .. } => ExError::new(ExErrorKind::NotFound),
            TrackerError::UnknownEntityType { entity_type } => {
                ExError::new(ExErrorKind::NotFound).with_entity_type(entity_type)
            }
            TrackerError::UnknownMember {
                entity_type,
                member,
            } => ExError::new(ExErrorKind::NotFound)
                .with_entity_type(entity_type)
                .with_member(member),
            TrackerError::ValueGeneration {
                entity_type,
                property,
                ..
            } => ExError::new(ExErrorKind::ValueGeneration)
                .with_entity_type(entity_type)
                .with_member(property),
            TrackerError::Cancelled { op } => ExError::new(ExErrorKind::Cancelled).with_op(op),
            TrackerError::Store { .. } => ExError::new(ExErrorKind::Persistence),
            TrackerError::Config { .. } => ExError::new(ExErrorKind::Config),
        }
        .with_message(message)
    }
}

impl From<toml::de::Error> for TrackerError {
    fn from(err: toml::de::Error) -> Self {
        TrackerError::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_error_kind_codes() {
        let cases = [
            (ExErrorKind::IdentityConflict, "ERR_IDENTITY_CONFLICT"),
            (ExErrorKind::InvalidKeyValue, "ERR_INVALID_KEY_VALUE"),
            (ExErrorKind::KeyTypeMismatch, "ERR_KEY_TYPE_MISMATCH"),
            (ExErrorKind::KeyReadOnly, "ERR_KEY_READ_ONLY"),
            (ExErrorKind::TempValuePersists, "ERR_TEMP_VALUE_PERSISTS"),
            (
                ExErrorKind::MissingNotificationInterface,
                "ERR_MISSING_NOTIFICATION_INTERFACE",
            ),
        ];
        for (kind, expected_code) in cases {
            assert_eq!(kind.code(), expected_code, "Wrong code for {:?}", kind);
        }
    }

    #[test]
    fn test_key_read_only_maps_with_context() {
        let err = TrackerError::KeyReadOnly {
            entity_type: "Blog".to_string(),
            property: "Id".to_string(),
        };
        let ex: ExError = err.into();
        assert_eq!(ex.kind(), ExErrorKind::KeyReadOnly);
        assert_eq!(ex.entity_type(), Some("Blog"));
        assert_eq!(ex.member(), Some("Id"));
        assert!(ex.message().contains("part of a key"));
    }

    #[test]
    fn test_relationship_conceptual_null_message() {
        let err = TrackerError::RelationshipConceptualNull {
            principal_type: "Blog".to_string(),
            dependent_type: "Post".to_string(),
            detail: String::new(),
        };
        let text = err.to_string();
        assert!(text.contains("'Blog'"));
        assert!(text.contains("'Post'"));
        assert_eq!(
            ExError::from(err).code(),
            "ERR_RELATIONSHIP_CONCEPTUAL_NULL"
        );
    }

    #[test]
    fn test_display_includes_code_and_op() {
        let ex = ExError::new(ExErrorKind::Cancelled)
            .with_op("save_changes")
            .with_message("token fired");
        let text = ex.to_string();
        assert!(text.starts_with("[ERR_CANCELLED]"));
        assert!(text.contains("save_changes"));
        assert!(text.contains("token fired"));
    }

    #[test]
    fn test_not_found_variants_share_kind() {
        let a: ExError = TrackerError::UnknownInstance {
            instance: "#9".to_string(),
        }
        .into();
        let b: ExError = TrackerError::UnknownEntityType {
            entity_type: "Ghost".to_string(),
        }
        .into();
        assert_eq!(a.kind(), ExErrorKind::NotFound);
        assert_eq!(b.kind(), ExErrorKind::NotFound);
        assert_eq!(b.entity_type(), Some("Ghost"));
    }
}
