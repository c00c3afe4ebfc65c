//! Seams to collaborators outside the tracking core
//!
//! - [`EntityStateListener`] observes two-phase state notifications
//! - [`StoreApplier`] writes a batch of pending entries to the backing store
//!   during a save and reports the values the store generated

use async_trait::async_trait;
use entrack_core_types::RequestContext;
use tokio_util::sync::CancellationToken;

use crate::entry::{EntityState, UpdateEntry};
use crate::errors::Result;
use crate::graph::InstanceId;
use crate::model::{PropertyId, Value};

/// Observer of entry state transitions
///
/// Listeners run after the tracker's own reactions (fixup, change detection)
/// to the same transition. Both methods default to doing nothing.
pub trait EntityStateListener: Send + Sync {
    /// Called before the entry leaves its current state
    fn state_changing(&self, _entry: &UpdateEntry<'_>, _new_state: EntityState) {}

    /// Called after the transition; `from_query` is set for entries
    /// materialized by `start_tracking_from_query`
    fn state_changed(&self, _entry: &UpdateEntry<'_>, _old_state: EntityState, _from_query: bool) {}
}

/// One value produced by the store for a pending entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedValue {
    pub instance: InstanceId,
    pub property: PropertyId,
    pub value: Value,
}

/// Outcome of applying one batch to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreResult {
    pub rows_affected: usize,
    /// Applied to the entries before changes are accepted
    pub generated: Vec<GeneratedValue>,
}

impl StoreResult {
    pub fn new(rows_affected: usize) -> Self {
        Self {
            rows_affected,
            generated: Vec::new(),
        }
    }

    pub fn with_generated(mut self, instance: InstanceId, property: PropertyId, value: impl Into<Value>) -> Self {
        self.generated.push(GeneratedValue {
            instance,
            property,
            value: value.into(),
        });
        self
    }
}

/// The external "apply to store" step of a save
///
/// Receives every Added, Modified and Deleted entry after pre-save checks.
/// Implementations build and run the insert, update and delete commands and
/// must not assume the entries outlive the call.
#[async_trait]
pub trait StoreApplier: Send + Sync {
    /// # Errors
    ///
    /// Any error aborts the save; pending store-generated values are discarded
    /// and entry states are left untouched.
    fn apply(&self, entries: &[UpdateEntry<'_>], context: &RequestContext) -> Result<StoreResult>;

    /// Awaitable variant; defaults to the synchronous path
    ///
    /// # Errors
    ///
    /// As [`StoreApplier::apply`]; implementations should return
    /// `TrackerError::Cancelled` when `cancellation` fires.
    async fn apply_async(
        &self,
        entries: &[UpdateEntry<'_>],
        context: &RequestContext,
        cancellation: &CancellationToken,
    ) -> Result<StoreResult> {
        if cancellation.is_cancelled() {
            return Err(crate::errors::TrackerError::Cancelled {
                op: "apply_async".to_string(),
            });
        }
        self.apply(entries, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_result_builder() {
        let result = StoreResult::new(2).with_generated(
            crate::graph::InstanceId(0),
            crate::model::PropertyId(0),
            42,
        );
        assert_eq!(result.rows_affected, 2);
        assert_eq!(result.generated.len(), 1);
        assert_eq!(result.generated[0].value, Value::Int(42));
    }
}
