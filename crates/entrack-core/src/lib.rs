//! Entrack Core - in-memory entity change tracking
//!
//! This crate tracks a graph of entity instances against a relational model
//! and works out what a store has to do to persist them, including:
//! - Entity models with keys, foreign keys and navigations
//! - Per-instance entries with state, original values and relationship snapshots
//! - Identity maps and dependents maps for key and foreign-key lookups
//! - Navigation fixup keeping both sides of a relationship consistent
//! - Snapshot change detection and cascade delete
//! - Value generation, the save pipeline and accepting changes

pub mod config;
pub mod entry;
pub mod errors;
pub mod fixup;
pub mod graph;
pub mod graph_iterator;
pub mod hooks;
pub mod identity;
pub mod keys;
pub mod logging_facility;
pub mod model;
pub mod row;
pub mod snapshot;
pub mod state_manager;
pub mod value_generation;

// Re-export commonly used types
pub use config::{CascadeTiming, TrackerOptions};
pub use entry::{EntityState, UpdateEntry};
pub use errors::{ExError, ExErrorKind, Result, TrackerError};
pub use fixup::FixupStats;
pub use graph::InstanceId;
pub use hooks::{EntityStateListener, StoreApplier, StoreResult};
pub use keys::KeyValue;
pub use model::{
    ChangeTrackingStrategy, DeleteBehavior, EntityTypeId, ForeignKeyId, KeyId, Model, ModelBuilder,
    NavigationId, PropertyId, SaveBehavior, Value, ValueGenerated, ValueKind,
};
pub use row::ValueBuffer;
pub use state_manager::{DebugViewMode, StateManager};
pub use value_generation::{ValueGenerator, ValueGeneratorRegistry};
